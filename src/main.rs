use std::env;
use std::fs;
use std::process::ExitCode;

use sandlisp::{Environment, eval_str_in};

const DEMO: &str = r#"
(let ((i 0) (total 0)))
(while (< i 5)
  (set 'i (+ i 1))
  (set 'total (+ total i)))
(sendf "1 + 2 + 3 + 4 + 5 = %d" total)
total
"#;

fn main() -> ExitCode {
    let source = match env::args().nth(1) {
        Some(path) => match fs::read_to_string(&path) {
            Ok(source) => source,
            Err(e) => {
                eprintln!("cannot read `{}`: {}", path, e);
                return ExitCode::FAILURE;
            }
        },
        None => {
            println!("No script given; evaluating the demo program.");
            DEMO.to_string()
        }
    };

    match eval_str_in(&source, Environment::standard()) {
        Ok(result) => {
            println!("{}", result);
            ExitCode::SUCCESS
        }
        Err(error) => {
            error.pretty_print();
            ExitCode::FAILURE
        }
    }
}
