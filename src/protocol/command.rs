use crate::error::CommandError;

/// A decoded request.
///
/// Requests are single lines of text: a verb followed by space-separated
/// arguments. `UPLOAD` carries the base64 file content as its final
/// argument, which can be hundreds of megabytes long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    Upload { filename: String, content: String },
    Get { filename: String },
}

impl Command {
    /// Parse a command string. The verb is case-insensitive.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let (verb, rest) = split_word(line);
        if verb.is_empty() {
            return Err(CommandError::Empty);
        }
        let verb = verb.to_ascii_uppercase();

        match verb.as_str() {
            "LIST" => Ok(Command::List),
            "GET" => {
                let (filename, _) = split_word(rest);
                Ok(Command::Get {
                    filename: validate_filename(required(filename, "filename")?)?,
                })
            }
            "UPLOAD" => {
                let (filename, content) = split_word(rest);
                let filename = required(filename, "filename")?;
                Ok(Command::Upload {
                    filename: validate_filename(filename)?,
                    content: required(content.trim_end(), "content")?.to_string(),
                })
            }
            _ => Err(CommandError::UnknownVerb(verb)),
        }
    }

    /// Render the command as it is sent on the wire (without the sentinel).
    pub fn to_line(&self) -> String {
        match self {
            Command::List => "LIST".to_string(),
            Command::Get { filename } => format!("GET {}", filename),
            Command::Upload { filename, content } => format!("UPLOAD {} {}", filename, content),
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Command::List => "LIST",
            Command::Upload { .. } => "UPLOAD",
            Command::Get { .. } => "GET",
        }
    }
}

/// First whitespace-delimited word of `text`, and what follows it with
/// leading whitespace removed.
fn split_word(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim_start()),
        None => (text, ""),
    }
}

fn required<'a>(arg: &'a str, name: &'static str) -> Result<&'a str, CommandError> {
    if arg.is_empty() {
        Err(CommandError::MissingArgument(name))
    } else {
        Ok(arg)
    }
}

/// Accept only a bare file name that stays inside the storage directory.
pub fn validate_filename(name: &str) -> Result<String, CommandError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if invalid {
        return Err(CommandError::InvalidFilename(name.to_string()));
    }
    Ok(name.to_string())
}
