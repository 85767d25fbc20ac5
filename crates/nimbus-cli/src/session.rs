use anyhow::Result;
use bat::PrettyPrinter;
use cliclack::spinner;
use console::style;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use nimbus::agent::Agent;

/// Interactive loop around the agent. A failed query is reported and the
/// prompt continues; only the exit sentinel or end of input ends the
/// session. The channel (and the tool server process) is released when the
/// session is dropped.
pub struct Session {
    agent: Agent,
}

impl Session {
    pub fn new(agent: Agent) -> Self {
        Session { agent }
    }

    pub async fn start(&mut self) -> Result<()> {
        let mut editor = DefaultEditor::new()?;
        println!("{}", style("Type your query (or \"exit\" to quit)").dim());

        loop {
            let line = match editor.readline("> ") {
                Ok(line) => line,
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(e) => return Err(e.into()),
            };

            let query = line.trim();
            if query.is_empty() {
                continue;
            }
            if is_exit(query) {
                break;
            }
            let _ = editor.add_history_entry(query);

            let spin = spinner();
            spin.start("awaiting reply");
            let result = self.agent.process_query(query).await;
            spin.stop("");

            match result {
                Ok(answer) => render(&answer),
                Err(e) => println!(
                    "{}",
                    style(format!("Error processing query: {e:#}")).red()
                ),
            }
            println!();
        }

        Ok(())
    }
}

/// The sentinel that ends the session, matched case-insensitively
fn is_exit(input: &str) -> bool {
    input.trim().eq_ignore_ascii_case("exit")
}

fn render(content: &str) {
    let rendered = PrettyPrinter::new()
        .input_from_bytes(content.as_bytes())
        .language("markdown")
        .print();
    if rendered.is_err() {
        println!("{content}");
    }
}
