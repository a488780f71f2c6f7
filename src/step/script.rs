use camino::Utf8PathBuf;
use oxc::allocator::Allocator;
use oxc::codegen::{Codegen, CodegenOptions, CommentOptions};
use oxc::mangler::MangleOptions;
use oxc::minifier::{CompressOptions, Minifier, MinifierOptions};
use oxc::parser::Parser;
use oxc::span::SourceType;
use thiserror::Error;

use crate::task::Asset;

/// Errors that can occur when processing JavaScript files.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// The file is not valid UTF-8.
    #[error("{0} is not valid UTF-8")]
    Encoding(Utf8PathBuf),

    /// The parser rejected the file.
    #[error("Syntax error in {0}:\n{1}")]
    Syntax(Utf8PathBuf, String),
}

/// Parse the script and print it back. Syntax errors abort the task; the
/// output is normalized but semantically identical.
///
/// Files with `import` or `export` are parsed as modules, everything else
/// as a classic script whose top-level declarations are globals.
pub fn transpile(asset: Asset) -> Result<Asset, ScriptError> {
    let code = {
        let text = source_text(&asset)?;

        let allocator = Allocator::default();
        let ret = Parser::new(&allocator, text, SourceType::unambiguous()).parse();
        if !ret.errors.is_empty() {
            return Err(syntax_error(&asset, &ret.errors));
        }

        Codegen::new().build(&ret.program).code
    };

    Ok(Asset {
        data: code.into_bytes(),
        ..asset
    })
}

/// Compress, mangle and print the script without whitespace or comments.
/// Top-level names of classic scripts are kept, other scripts and inline
/// handlers may refer to them.
pub fn minify(asset: Asset) -> Result<Asset, ScriptError> {
    let code = {
        let text = source_text(&asset)?;

        let allocator = Allocator::default();
        let ret = Parser::new(&allocator, text, SourceType::unambiguous()).parse();
        if !ret.errors.is_empty() {
            return Err(syntax_error(&asset, &ret.errors));
        }

        let mut program = ret.program;
        let options = MinifierOptions {
            mangle: Some(MangleOptions::default()),
            compress: Some(CompressOptions::smallest()),
        };
        let ret = Minifier::new(options).minify(&allocator, &mut program);

        Codegen::new()
            .with_options(CodegenOptions {
                minify: true,
                comments: CommentOptions::disabled(),
                ..CodegenOptions::default()
            })
            .with_scoping(ret.scoping)
            .build(&program)
            .code
    };

    Ok(Asset {
        data: code.into_bytes(),
        ..asset
    })
}

fn source_text(asset: &Asset) -> Result<&str, ScriptError> {
    std::str::from_utf8(&asset.data).map_err(|_| ScriptError::Encoding(asset.source.clone()))
}

fn syntax_error(asset: &Asset, errors: &[impl std::fmt::Display]) -> ScriptError {
    let message = errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n");

    ScriptError::Syntax(asset.source.clone(), message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(code: &str) -> Asset {
        Asset {
            source: "/project/src/js/app.js".into(),
            path: "app.js".into(),
            data: code.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_transpile_keeps_behavior() {
        let out = transpile(asset("const  greet = (name) => `hi ${name}`;\nexport { greet };")).unwrap();
        let text = String::from_utf8(out.data).unwrap();

        assert!(text.contains("greet"));
        assert!(text.contains("export"));
        assert_eq!(out.path, "app.js");
    }

    #[test]
    fn test_minify_shrinks() {
        let code = r#"
// a comment that must disappear
function addNumbers(firstNumber, secondNumber) {
    const total = firstNumber + secondNumber;
    return total;
}
console.log(addNumbers(1, 2));
"#;
        let out = minify(asset(code)).unwrap();
        let text = String::from_utf8(out.data).unwrap();

        assert!(text.len() < code.len());
        assert!(!text.contains("a comment"));
        assert!(text.contains("console.log"));
    }

    #[test]
    fn test_minify_keeps_script_globals() {
        let code = "function openMenu() {\n    document.body.classList.add('open');\n}\nvar counter = 0;\n";

        let out = minify(transpile(asset(code)).unwrap()).unwrap();
        let text = String::from_utf8(out.data).unwrap();

        assert!(text.contains("function openMenu("), "{text}");
        assert!(text.contains("counter"), "{text}");
    }

    #[test]
    fn test_minify_module_drops_unused_locals() {
        let code = "const unusedHelper = () => 1;\nexport const value = 2;\n";

        let out = minify(asset(code)).unwrap();
        let text = String::from_utf8(out.data).unwrap();

        assert!(!text.contains("unusedHelper"), "{text}");
        assert!(text.contains("export"), "{text}");
    }

    #[test]
    fn test_syntax_error_is_fatal() {
        let err = transpile(asset("function (")).unwrap_err();

        assert!(matches!(err, ScriptError::Syntax(..)));
    }

    #[test]
    fn test_binary_is_rejected() {
        let mut input = asset("");
        input.data = vec![0xff, 0xfe, 0x00];

        assert!(matches!(minify(input), Err(ScriptError::Encoding(_))));
    }
}
