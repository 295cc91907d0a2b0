use crate::github::issues::ItemNumber;

/// Enum representing CLI commands
#[derive(Debug, PartialEq)]
pub enum Command {
    List,
    Watch,
    Refresh,
    Clear,
    Toggle { number: ItemNumber },
    Rename { number: ItemNumber, title: String },
    Login,
    Logout,
    Help,
    Unknown(String),
}

pub const USAGE: &str = "\
Usage: issuesync <command>

Commands:
  list                      Show issues and pull requests (cached when fresh)
  watch                     Show the list and print it again after every refresh
  refresh                   Fetch everything now
  clear                     Delete the cached data for this repository
  toggle <number>.<index>   Check or uncheck a checklist item
  rename <number> <title>   Rename an issue, pull request or checklist item
  login                     Sign in with GitHub
  logout                    Remove the stored token
  help                      Show this message";

fn parse_number(arg: &str) -> Result<ItemNumber, Command> {
    arg.parse::<ItemNumber>().map_err(Command::Unknown)
}

/// Parse command line arguments and return a Command
///
/// # Arguments
/// * `args` - Command line arguments (including program name)
pub fn parse_args(args: &[String]) -> Command {
    let Some(command) = args.get(1) else {
        return Command::Help;
    };
    let rest = &args[2..];

    match (command.as_str(), rest.len()) {
        ("list", 0) => Command::List,
        ("watch", 0) => Command::Watch,
        ("refresh", 0) => Command::Refresh,
        ("clear", 0) => Command::Clear,
        ("login", 0) => Command::Login,
        ("logout", 0) => Command::Logout,
        ("help" | "--help" | "-h", _) => Command::Help,
        ("toggle", 1) => match parse_number(&rest[0]) {
            Ok(number @ ItemNumber::SubItem { .. }) => Command::Toggle { number },
            Ok(number) => Command::Unknown(format!(
                "Only checklist items can be toggled. Usage: issuesync toggle {}.<index>",
                number
            )),
            Err(unknown) => unknown,
        },
        ("toggle", _) => Command::Unknown(
            "Missing item argument. Usage: issuesync toggle <number>.<index>".to_string(),
        ),
        ("rename", n) if n >= 2 => {
            let title = rest[1..].join(" ");
            if title.trim().is_empty() {
                return Command::Unknown("Title must not be empty.".to_string());
            }
            match parse_number(&rest[0]) {
                Ok(number) => Command::Rename {
                    number,
                    title: title.trim().to_string(),
                },
                Err(unknown) => unknown,
            }
        }
        ("rename", _) => Command::Unknown(
            "Missing arguments. Usage: issuesync rename <number> <title>".to_string(),
        ),
        _ => Command::Unknown(args[1..].join(" ")),
    }
}
