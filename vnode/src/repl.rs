use crate::commands;
use netstack::NetworkStack;
use rustyline::{error::ReadlineError, history::DefaultHistory, Editor};
use std::collections::HashMap;
use std::result;
use std::sync::Arc;

pub type CommandHandler = Box<dyn Fn(&Arc<NetworkStack>, Vec<String>) -> result::Result<(), String>>;

pub enum NumArgs {
    Exactly(usize),
    AtLeast(usize),
}

pub struct CommandData {
    pub handler: CommandHandler,
    pub num_args: NumArgs,
    pub usage: &'static str,
}

pub type CommandTable = HashMap<String, CommandData>;

pub struct Repl {
    stack: Arc<NetworkStack>,
    command_table: CommandTable,
}

impl Repl {
    pub fn new(stack: Arc<NetworkStack>) -> Repl {
        let command_table = commands::all_commands()
            .into_iter()
            .map(|(name, cd)| (name.to_string(), cd))
            .collect();
        Repl { stack, command_table }
    }
    /// Reads commands until `q`, end of input or Ctrl-C
    pub fn run_repl(&self) {
        let mut ed = match Editor::<(), DefaultHistory>::new() {
            Ok(ed) => ed,
            Err(e) => return eprintln!("cannot open the terminal: {e}"),
        };
        loop {
            match ed.readline("> ") {
                Ok(line) => {
                    if line.trim() == "q" {
                        break;
                    }
                    if line.trim().is_empty() {
                        continue;
                    }
                    let _ = ed.add_history_entry(line.as_str());
                    if let Err(e) = self.execute_command(&line) {
                        println!("{e}");
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(e) => eprintln!("{e:?}"),
            }
        }
        println!("Exiting");
    }
    pub fn execute_command(&self, line: &str) -> result::Result<(), String> {
        let mut split_cmd = line.split_whitespace();
        let cmd = split_cmd.next().ok_or_else(|| String::from("No command input"))?;
        let args = split_cmd.map(str::to_string).collect();
        self.handle_cmd(cmd, args)
    }
    fn handle_cmd(&self, cmd: &str, args: Vec<String>) -> result::Result<(), String> {
        if cmd == "help" {
            self.print_help();
            return Ok(());
        }
        let cmd_data = self
            .command_table
            .get(cmd)
            .ok_or_else(|| format!("Invalid command: {cmd:?} (try help)"))?;
        match cmd_data.num_args {
            NumArgs::Exactly(num) if num == args.len() => {}
            NumArgs::AtLeast(num) if args.len() >= num => {}
            _ => return Err(format!("usage: {}", cmd_data.usage)),
        }
        (cmd_data.handler)(&self.stack, args)
    }
    fn print_help(&self) {
        let mut usages: Vec<&str> = self.command_table.values().map(|cd| cd.usage).collect();
        usages.sort_unstable();
        for usage in usages {
            println!("  {usage}");
        }
        println!("  q");
    }
}
