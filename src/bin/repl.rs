use std::cell::RefCell;
use std::rc::Rc;

use rustyline::error::ReadlineError;
use rustyline::highlight::{CmdKind, Highlighter};
use rustyline::validate::{ValidationContext, ValidationResult, Validator};
use rustyline::{Cmd, Completer, Context, Editor, EventHandler, KeyCode, KeyEvent, Modifiers};
use rustyline::{Helper, Highlighter, Hinter, Validator};
use sandlisp::evaluator::special_form_identifiers;
use sandlisp::{Environment, eval_str_in};

struct SandlispCompleter {
    env: Rc<RefCell<Environment>>,
}

// The trailing delimiter-free run of the line, i.e. the atom being typed.
fn completion_prefix(line: &str) -> &str {
    match line.rfind([' ', '\t', '\n', '(', ')', '[', ']', '"']) {
        Some(i) => &line[i + 1..],
        None => line,
    }
}

impl rustyline::completion::Completer for SandlispCompleter {
    type Candidate = String;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<String>)> {
        let prefix = completion_prefix(&line[..pos]);
        // A leading quote still completes against the plain identifier
        let name = prefix.strip_prefix('\'').unwrap_or(prefix);
        if name.is_empty() {
            return Ok((pos, vec![]));
        }

        let mut candidates: Vec<String> = self
            .env
            .borrow()
            .get_identifiers()
            .union(&special_form_identifiers())
            .filter(|id| id.starts_with(name))
            .map(|id| id[name.len()..].to_string())
            .collect();
        candidates.sort();
        Ok((pos, candidates))
    }
}

#[derive(Completer, Helper, Highlighter, Hinter, Validator)]
struct InputHelper {
    #[rustyline(Validator)]
    validator: SandlispValidator,
    #[rustyline(Highlighter)]
    highlighter: SandlispHighlighter,
    #[rustyline(Completer)]
    completer: SandlispCompleter,
}

struct SandlispValidator;

impl Validator for SandlispValidator {
    // Hold the line open while a brace or string literal is unfinished, so
    // multi-line forms can be typed naturally.
    fn validate(&self, ctx: &mut ValidationContext) -> rustyline::Result<ValidationResult> {
        let input = ctx.input();
        let mut stack = Vec::new();
        let mut in_string = false;
        let mut escape = false;

        for (i, c) in input.chars().enumerate() {
            if in_string {
                if escape {
                    escape = false;
                } else if c == '\\' {
                    escape = true;
                } else if c == '"' {
                    in_string = false;
                }
                continue;
            }

            match c {
                '"' => in_string = true,
                '(' | '[' => stack.push(c),
                ')' | ']' => match stack.pop() {
                    Some('(') if c == ')' => {}
                    Some('[') if c == ']' => {}
                    _ => {
                        return Ok(ValidationResult::Invalid(Some(format!(
                            "  - unmatched '{}' at position {}",
                            c, i
                        ))));
                    }
                },
                _ => {}
            }
        }

        if in_string || !stack.is_empty() {
            Ok(ValidationResult::Incomplete)
        } else {
            Ok(ValidationResult::Valid(None))
        }
    }
}

struct SandlispHighlighter;

impl Highlighter for SandlispHighlighter {
    fn highlight<'l>(&self, line: &'l str, pos: usize) -> std::borrow::Cow<'l, str> {
        let mut stack: Vec<(char, usize)> = Vec::new();
        let mut highlighted = String::new();
        let mut in_string = false;
        let mut escape = false;

        for (i, c) in line.chars().enumerate() {
            if in_string {
                if escape {
                    escape = false;
                } else if c == '\\' {
                    escape = true;
                } else if c == '"' {
                    in_string = false;
                }
                highlighted.push_str(&format!("\x1b[32m{}\x1b[0m", c)); // Green for strings
                continue;
            }

            match c {
                '"' => {
                    in_string = true;
                    highlighted.push_str(&format!("\x1b[32m{}\x1b[0m", c));
                }
                '(' | '[' => {
                    stack.push((c, highlighted.len()));
                    highlighted.push(c);
                }
                ')' | ']' => {
                    if let Some((opening, matching_pos)) = stack.pop() {
                        if (opening == '(' && c == ')') || (opening == '[' && c == ']') {
                            if matching_pos == pos.saturating_sub(1) || i == pos.saturating_sub(1) {
                                // Blue for the bracket pair at the cursor
                                highlighted.push_str(&format!("\x1b[34m{}\x1b[0m", c));
                                highlighted.replace_range(
                                    matching_pos..=matching_pos,
                                    &format!("\x1b[1;34m{}\x1b[0m", opening),
                                );
                            } else {
                                highlighted.push(c);
                            }
                        } else {
                            // Red for crossed bracket kinds
                            highlighted.push_str(&format!("\x1b[31m{}\x1b[0m", c));
                            highlighted.replace_range(
                                matching_pos..=matching_pos,
                                &format!("\x1b[1;31m{}\x1b[0m", opening),
                            );
                        }
                    } else {
                        // Red for unmatched closing brackets
                        highlighted.push_str(&format!("\x1b[31m{}\x1b[0m", c));
                    }
                }
                _ => {
                    highlighted.push(c);
                }
            }
        }

        std::borrow::Cow::Owned(highlighted)
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _kind: CmdKind) -> bool {
        true
    }
}

fn main() -> rustyline::Result<()> {
    println!("sandlisp REPL v0.1.0");
    println!("Type 'exit' or press Ctrl-D to quit.");

    let env = Environment::standard();
    let helper = InputHelper {
        validator: SandlispValidator,
        highlighter: SandlispHighlighter,
        completer: SandlispCompleter { env: env.clone() },
    };
    let config = rustyline::config::Config::builder()
        .edit_mode(rustyline::EditMode::Vi)
        .build();
    let mut rl = Editor::with_config(config)?;
    rl.set_helper(Some(helper));
    rl.bind_sequence(
        KeyEvent(KeyCode::Char('s'), Modifiers::CTRL),
        EventHandler::Simple(Cmd::Newline),
    );
    if rl.load_history("sandlisp_history.txt").is_err() {
        println!("No previous history.");
    }

    loop {
        match rl.readline("sandlisp> ") {
            Ok(line) => {
                rl.add_history_entry(line.as_str())?;
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                if input.eq_ignore_ascii_case("exit") {
                    break;
                }

                // The environment persists across lines, so definitions
                // accumulate like in a script.
                match eval_str_in(input, env.clone()) {
                    Ok(result) => println!("{}", result),
                    Err(error) => error.pretty_print(),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("Interrupted. Type 'exit' or Ctrl-D to quit.");
            }
            Err(ReadlineError::Eof) => {
                println!("\nExiting.");
                break;
            }
            Err(err) => {
                eprintln!("Readline Error: {:?}", err);
                break;
            }
        }
    }
    rl.save_history("sandlisp_history.txt")
}
