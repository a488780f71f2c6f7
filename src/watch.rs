//! Watch mode is implemented as a three-part system:
//!
//! 1. **HTTP server**: serves the `dist` folder and injects a small client
//!    script into every HTML page it hands out.
//! 2. **WebSocket server**: spawns a dedicated thread using `tungstenite`
//!    to maintain persistent connections with open browser tabs.
//! 3. **File watcher**: uses the `notify` crate to monitor the source
//!    folders recursively, with debouncing to collapse rapid saves.
//!
//! ## The Loop
//!
//! When a file change is detected:
//! 1. Every task whose globs match the changed path is re-run on the rayon
//!    pool. Tasks of different categories run concurrently; two runs of the
//!    same task may overlap, which is fine because a run is idempotent.
//! 2. Once a task finishes successfully, the WebSocket thread is signalled.
//! 3. The server broadcasts the reload command to all connected clients,
//!    triggering a full page refresh.

use std::collections::HashSet;
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::mpsc::{RecvError, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use glob::{MatchOptions, Pattern};
use notify::{EventKind, RecursiveMode};
use notify_debouncer_full::new_debouncer;
use tungstenite::WebSocket;

use crate::config::Config;
use crate::error::WatchError;
use crate::io;
use crate::task::Task;

type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

/// How often the watch loop checks on the HTTP thread.
const SERVER_CHECK: Duration = Duration::from_secs(1);

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// The live preview: HTTP server, reload channel and the threads behind
/// them. Created when entering watch mode and owned by the caller until the
/// process exits.
pub struct DevServer {
    reload: Sender<()>,
    thread_http: JoinHandle<anyhow::Result<()>>,
    _thread_i: JoinHandle<()>,
    _thread_o: JoinHandle<()>,
}

impl DevServer {
    pub fn start(config: &Config) -> Result<Self, WatchError> {
        let (tcp, reload_port) = reserve_port(config.server.reload_port)?;
        let clients = Arc::new(Mutex::new(vec![]));

        let thread_i = new_thread_ws_incoming(tcp, clients.clone());
        let (reload, thread_o) = new_thread_ws_reload(clients);

        let dist = config.dist();
        if !dist.is_dir() {
            tracing::warn!("{} does not exist, nothing to serve yet", dist);
        }

        tracing::debug!("live reload listening on ws://localhost:{reload_port}");
        let thread_http = crate::server::start(dist, config.server.port, reload_port);

        Ok(Self {
            reload,
            thread_http,
            _thread_i: thread_i,
            _thread_o: thread_o,
        })
    }

    /// Block until the HTTP server stops.
    pub fn wait(self) -> Result<(), WatchError> {
        join_server(self.thread_http)
    }

    /// Re-run the bound task whenever one of its sources changes, then
    /// reload the clients. Never returns unless the watcher or the HTTP
    /// server fails.
    pub fn watch(self, config: &Config, tasks: Vec<Task>) -> Result<(), WatchError> {
        let root = config.root.canonicalize_utf8()?;
        let config = Arc::new(Config {
            root: root.clone(),
            ..config.clone()
        });

        let bindings = tasks
            .into_iter()
            .map(|task| Binding::new(&root, task))
            .collect::<Result<Vec<_>, _>>()?;

        let (tx, rx) = std::sync::mpsc::channel();
        let mut debouncer = new_debouncer(Duration::from_millis(250), None, tx)?;

        let watched = bindings
            .iter()
            .flat_map(|binding| binding.roots.iter().cloned())
            .collect();

        // Collapse watched paths to reduce the number of watches
        for path in collapse_watch_paths(watched) {
            tracing::info!("watching {}", path);
            debouncer.watch(path.as_std_path(), RecursiveMode::Recursive)?;
        }

        loop {
            if self.thread_http.is_finished() {
                return match join_server(self.thread_http) {
                    Ok(()) => Err(WatchError::Server("HTTP server stopped".into())),
                    Err(e) => Err(e),
                };
            }

            let events = match rx.recv_timeout(SERVER_CHECK) {
                Ok(Ok(events)) => events,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(RecvError.into()),
                Ok(Err(errors)) => {
                    for e in errors {
                        tracing::error!("watch error: {:?}", e);
                    }
                    continue;
                }
            };

            let mut dirty = HashSet::new();
            for de in &events {
                if !matches!(
                    de.event.kind,
                    EventKind::Create(..) | EventKind::Modify(..) | EventKind::Remove(..)
                ) {
                    continue;
                }

                for path in &de.event.paths {
                    for (i, binding) in bindings.iter().enumerate() {
                        if binding.matches(path) {
                            dirty.insert(i);
                        }
                    }
                }
            }

            for i in dirty {
                let task = bindings[i].task.clone();
                let config = config.clone();
                let reload = self.reload.clone();

                tracing::info!("change detected, re-running {}...", task.name);
                rayon::spawn(move || rebuild(&config, &task, &reload));
            }
        }
    }
}

fn join_server(thread: JoinHandle<anyhow::Result<()>>) -> Result<(), WatchError> {
    match thread.join() {
        Ok(result) => result.map_err(|e| WatchError::Server(format!("{e:#}"))),
        Err(_) => Err(WatchError::Server("HTTP thread panicked".into())),
    }
}

fn rebuild(config: &Config, task: &Task, reload: &Sender<()>) {
    let s = Instant::now();

    match task.run(config) {
        Ok(_) => {
            reload.send(()).ok();
            tracing::info!("refreshed {} {}", task.name, io::as_overhead(s));
        }
        Err(e) => {
            tracing::error!("Encountered an error while rebuilding '{}': {e}", task.name)
        }
    }
}

/// A task together with the paths that should trigger it.
struct Binding {
    task: Arc<Task>,
    patterns: Vec<Pattern>,
    roots: Vec<Utf8PathBuf>,
}

impl Binding {
    fn new(root: &Utf8Path, task: Task) -> Result<Self, WatchError> {
        let mut patterns = Vec::new();
        let mut roots = Vec::new();

        for glob in task.watch {
            for glob in io::expand_braces(glob) {
                let (path, pattern) = resolve_watch_path(root, &glob)?;
                roots.push(path);
                patterns.push(pattern);
            }
        }

        Ok(Self {
            task: Arc::new(task),
            patterns,
            roots,
        })
    }

    fn matches(&self, path: &Path) -> bool {
        self.patterns
            .iter()
            .any(|pattern| pattern.matches_path_with(path, MATCH_OPTIONS))
    }
}

fn reserve_port(preferred: u16) -> Result<(TcpListener, u16), WatchError> {
    let listener = match TcpListener::bind(("127.0.0.1", preferred)) {
        Ok(sock) => sock,
        Err(_) => TcpListener::bind("127.0.0.1:0").map_err(WatchError::Bind)?,
    };

    let addr = listener.local_addr().map_err(WatchError::Bind)?;
    let port = addr.port();
    Ok((listener, port))
}

fn new_thread_ws_incoming(server: TcpListener, clients: Clients) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for stream in server.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!("websocket connection failed: {e}");
                    continue;
                }
            };

            match tungstenite::accept(stream) {
                Ok(socket) => clients
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(socket),
                Err(e) => tracing::warn!("websocket handshake failed: {e}"),
            }
        }
    })
}

fn new_thread_ws_reload(clients: Clients) -> (Sender<()>, JoinHandle<()>) {
    let (tx, rx) = std::sync::mpsc::channel();

    let thread = std::thread::spawn(move || {
        while rx.recv().is_ok() {
            let mut clients = clients.lock().unwrap_or_else(PoisonError::into_inner);
            let mut broken = vec![];

            for (i, socket) in clients.iter_mut().enumerate() {
                match socket.send("reload".into()) {
                    Ok(_) => {}
                    Err(tungstenite::error::Error::Io(e)) => {
                        if e.kind() == std::io::ErrorKind::BrokenPipe {
                            broken.push(i);
                        }
                    }
                    Err(tungstenite::error::Error::ConnectionClosed)
                    | Err(tungstenite::error::Error::AlreadyClosed) => broken.push(i),
                    Err(e) => {
                        tracing::error!("Error: {e:?}");
                    }
                }
            }

            for i in broken.into_iter().rev() {
                clients.remove(i);
            }

            // Close all but the last 10 connections
            let len = clients.len();
            if len > 10 {
                for mut socket in clients.drain(0..len - 10) {
                    socket.close(None).ok();
                }
            }
        }
    });

    (tx, thread)
}

/// Splits a glob into the static folder to watch and a compiled absolute
/// pattern for matching event paths. When the static folder doesn't exist
/// yet, its nearest existing ancestor is watched instead so the folder is
/// picked up once created.
fn resolve_watch_path(root: &Utf8Path, glob: &str) -> Result<(Utf8PathBuf, Pattern), WatchError> {
    let base = io::glob_base(glob);
    let static_root = root.join(&base);
    let suffix = Utf8Path::new(glob)
        .strip_prefix(&base)
        .unwrap_or(Utf8Path::new(glob));

    let pattern = Pattern::new(&format!(
        "{}/{}",
        Pattern::escape(static_root.as_str()),
        suffix
    ))?;

    let mut watch = static_root.as_path();
    while !watch.is_dir() {
        match watch.parent() {
            Some(parent) if parent.starts_with(root) => watch = parent,
            _ => {
                watch = root;
                break;
            }
        }
    }

    Ok((watch.to_path_buf(), pattern))
}

/// Reduces a set of paths to the minimal set of watch roots.
///
/// If we watch `/a` and `/a/b`, we only need to watch `/a` because
/// the watcher is recursive. This function sorts the paths and filters
/// out any path that is a subdirectory of a previously accepted path.
fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = paths.into_iter().collect();
    paths.sort();

    let mut filtered = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::task::Profile;

    fn project() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf())
            .unwrap()
            .canonicalize_utf8()
            .unwrap();
        (dir, root)
    }

    #[test]
    fn test_directory_wildcard() {
        let (_dir, root) = project();
        fs::create_dir_all(root.join("src/js")).unwrap();

        let (watch, pattern) = resolve_watch_path(&root, "src/js/**/*.js").unwrap();

        assert_eq!(watch, root.join("src/js"));
        assert!(pattern.matches_path_with(root.join("src/js/a/b.js").as_std_path(), MATCH_OPTIONS));
        assert!(pattern.matches_path_with(root.join("src/js/app.js").as_std_path(), MATCH_OPTIONS));
        assert!(!pattern.matches_path_with(root.join("src/js/app.ts").as_std_path(), MATCH_OPTIONS));
    }

    #[test]
    fn test_single_level_wildcard() {
        let (_dir, root) = project();
        fs::create_dir_all(root.join("src")).unwrap();

        let (watch, pattern) = resolve_watch_path(&root, "src/*.html").unwrap();

        assert_eq!(watch, root.join("src"));
        assert!(pattern.matches_path_with(root.join("src/index.html").as_std_path(), MATCH_OPTIONS));
        assert!(!pattern.matches_path_with(root.join("src/parts/nav.html").as_std_path(), MATCH_OPTIONS));
    }

    #[test]
    fn test_missing_folder_watches_ancestor() {
        let (_dir, root) = project();
        fs::create_dir_all(root.join("src")).unwrap();

        let (watch, _) = resolve_watch_path(&root, "src/fonts/**/*.ttf").unwrap();

        assert_eq!(watch, root.join("src"));
    }

    #[test]
    fn test_binding_expands_braces() {
        let (_dir, root) = project();

        let binding = Binding::new(&root, Task::images(Profile::Dev)).unwrap();

        assert!(binding.matches(root.join("src/images/a/logo.svg").as_std_path()));
        assert!(binding.matches(root.join("src/images/photo.jpeg").as_std_path()));
        assert!(!binding.matches(root.join("src/images/notes.txt").as_std_path()));
        assert!(!binding.matches(root.join("src/libs/logo.svg").as_std_path()));
    }

    #[test]
    fn test_markup_binding_covers_partials() {
        let (_dir, root) = project();

        let binding = Binding::new(&root, Task::markup(Profile::Dev)).unwrap();

        assert!(binding.matches(root.join("src/index.html").as_std_path()));
        assert!(binding.matches(root.join("src/parts/footer.html").as_std_path()));
        assert!(!binding.matches(root.join("src/scss/a.scss").as_std_path()));
    }

    #[test]
    fn test_collapse_watch_paths() {
        let mut paths = HashSet::new();
        paths.insert(Utf8PathBuf::from("/a"));
        paths.insert(Utf8PathBuf::from("/a/b"));
        paths.insert(Utf8PathBuf::from("/a/b/c"));
        paths.insert(Utf8PathBuf::from("/b"));
        paths.insert(Utf8PathBuf::from("/c/d"));

        let collapsed = collapse_watch_paths(paths);

        // /a/b and /a/b/c are covered by /a.
        assert_eq!(
            collapsed,
            vec![
                Utf8PathBuf::from("/a"),
                Utf8PathBuf::from("/b"),
                Utf8PathBuf::from("/c/d")
            ]
        );
    }

    #[test]
    fn test_collapse_watch_paths_similar_names() {
        let mut paths = HashSet::new();
        paths.insert(Utf8PathBuf::from("/foo"));
        paths.insert(Utf8PathBuf::from("/foo-bar"));

        let collapsed = collapse_watch_paths(paths);

        // /foo-bar is not a subdirectory of /foo
        assert_eq!(
            collapsed,
            vec![Utf8PathBuf::from("/foo"), Utf8PathBuf::from("/foo-bar")]
        );
    }

    #[test]
    fn test_rebuild_broadcasts_reload() {
        let (_dir, root) = project();
        fs::create_dir_all(root.join("src/libs")).unwrap();
        fs::write(root.join("src/libs/lib.js"), "lib()").unwrap();
        let config = Config::new(root.clone());
        let (tx, rx) = std::sync::mpsc::channel();

        rebuild(&config, &Task::libs(Profile::Dev), &tx);

        assert!(rx.try_recv().is_ok());
        assert_eq!(fs::read_to_string(root.join("dist/libs/lib.js")).unwrap(), "lib()");
    }

    #[test]
    fn test_failed_rebuild_keeps_clients() {
        let (_dir, root) = project();
        fs::create_dir_all(root.join("src/js")).unwrap();
        fs::write(root.join("src/js/broken.js"), "function (").unwrap();
        let config = Config::new(root);
        let (tx, rx) = std::sync::mpsc::channel();

        rebuild(&config, &Task::script(Profile::Prod), &tx);

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_watch_stops_when_http_server_fails() {
        let (_dir, root) = project();
        fs::create_dir_all(root.join("src")).unwrap();
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();

        let mut config = Config::new(root);
        config.server.port = taken.local_addr().unwrap().port();
        config.server.reload_port = 0;

        let server = DevServer::start(&config).unwrap();
        let err = server.watch(&config, vec![Task::libs(Profile::Dev)]).unwrap_err();

        assert!(matches!(err, WatchError::Server(..)), "{err}");
    }

    #[test]
    fn test_reserve_port_falls_back() {
        let (taken, port) = reserve_port(0).unwrap();

        let (_other, fallback) = reserve_port(port).unwrap();

        assert_ne!(port, fallback);
        drop(taken);
    }
}
