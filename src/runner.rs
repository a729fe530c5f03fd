use crate::config::Config;
use crate::evaluator::Evaluator;
use crate::lexer::Lexer;
use crate::parser::Parser;

/// Exit status used when the script cannot be parsed or fails at runtime.
pub const FAILURE_STATUS: i32 = 1;

/// Parse and run a script, rendering diagnostics to stderr.
///
/// `args` is what the script sees through `argc()`/`argv()`, the script
/// name first. Returns the script's exit status.
pub fn run(source: &str, filename: Option<&str>, args: &[String], config: &Config) -> i32 {
    let mut parser = Parser::new(Lexer::new(source));
    let parsed = parser.parse();

    let warnings = parser.take_warnings();
    tracing::debug!(warnings = warnings.len(), ok = parsed.is_ok(), "parsed script");
    if config.show_warnings {
        for warning in &warnings {
            warning.report(source, filename);
        }
    }

    let program = match parsed {
        Ok(program) => program,
        Err(error) => {
            error.report(source, filename);
            return FAILURE_STATUS;
        }
    };

    let mut evaluator = Evaluator::new(&program).with_config(config.clone());
    match evaluator.interpret(args) {
        Ok(status) => {
            tracing::debug!(status, "script finished");
            status
        }
        Err(error) => {
            error.report(source, filename);
            FAILURE_STATUS
        }
    }
}
