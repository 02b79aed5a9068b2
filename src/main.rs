use musil::builtins::load_file;
use musil::env::Env;
use musil::eval::eval;
use musil::reader::Reader;
use musil::value::Value;
use musil::{ErrorKind, COPYRIGHT, VERSION};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

fn main() {
    let mut interactive = false;
    let mut files = Vec::new();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "-i" => interactive = true,
            flag if flag.starts_with('-') => {
                eprintln!("usage is musil [-i] [file...]");
                return;
            }
            path => files.push(path.to_string()),
        }
    }

    let env = musil::global_env();

    if files.is_empty() {
        banner();
        run_repl(&env);
        return;
    }

    for path in &files {
        if load_file(path, &env).is_err() {
            eprintln!("warning: cannot open input file {path}");
        }
    }
    if interactive {
        run_repl(&env);
    }
}

fn banner() {
    println!("[musil, version {VERSION}]");
    println!();
    println!("music scripting language");
    println!("{COPYRIGHT}");
    println!();
}

/// Read-eval-print loop. Input accumulates across lines until it parses as
/// complete expressions, so multi-line forms work; every complete form is
/// evaluated and its result printed. EOF exits.
fn run_repl(env: &Env) {
    let mut rl = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(err) => {
            eprintln!("error: cannot initialize line editor: {err}");
            return;
        }
    };

    let mut pending = String::new();
    loop {
        match rl.readline(">> ") {
            Ok(line) => {
                pending.push_str(&line);
                pending.push('\n');
                match read_pending(&pending) {
                    Pending::Incomplete => continue,
                    Pending::Forms(forms) => {
                        let _ = rl.add_history_entry(pending.trim_end());
                        pending.clear();
                        for form in forms {
                            match eval(&form, env) {
                                Ok(value) => println!("{}", value.display_form()),
                                Err(err) => eprintln!("error: {err}"),
                            }
                        }
                    }
                    Pending::Bad(err) => {
                        pending.clear();
                        eprintln!("error: {err}");
                    }
                }
            }
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => break,
            Err(err) => {
                eprintln!("error: {err}");
                break;
            }
        }
    }
}

enum Pending {
    Forms(Vec<Value>),
    Incomplete,
    Bad(musil::Error),
}

fn read_pending(source: &str) -> Pending {
    let mut reader = Reader::new(source);
    let mut forms = Vec::new();
    loop {
        match reader.read() {
            Ok(Some(form)) => forms.push(form),
            Ok(None) => return Pending::Forms(forms),
            Err(err) if err.kind == ErrorKind::Incomplete => return Pending::Incomplete,
            Err(err) => return Pending::Bad(err),
        }
    }
}
