#[cfg_attr(test, derive(Debug, PartialEq))]
pub(crate) enum JobpenAction {
    Help,
    Version,
    Run(JobpenRunOptions),
}

#[cfg_attr(test, derive(Debug, PartialEq))]
pub(crate) struct JobpenRunOptions {
    // --hidden
    pub(crate) hidden: bool,

    pub(crate) command: String,
    pub(crate) arguments: Vec<String>,
}

impl JobpenAction {
    pub(crate) fn from_env() -> Result<Self, String> {
        Self::parse_arguments(std::env::args().skip(1))
    }

    /// Parse the supervisor's own options. Parsing stops at the first
    /// positional argument: the command line from there on belongs to the
    /// child, verbatim.
    pub(crate) fn parse_arguments(
        arguments: impl IntoIterator<Item = String>,
    ) -> Result<Self, String> {
        let mut arguments = arguments.into_iter();
        let mut hidden = false;

        let command = loop {
            let Some(argument) = arguments.next() else {
                return Err("no command given".to_string());
            };

            match argument.as_str() {
                "-h" | "--help" => return Ok(Self::Help),
                "-V" | "--version" => return Ok(Self::Version),
                "--hidden" => hidden = true,
                "--" => {
                    let Some(command) = arguments.next() else {
                        return Err("no command given".to_string());
                    };
                    break command;
                }
                // a lone "-" is a valid command name, flags are not
                flag if flag.len() > 1 && flag.starts_with('-') => {
                    return Err(format!("unexpected argument '{argument}'"));
                }
                _ => break argument,
            }
        };

        Ok(Self::Run(JobpenRunOptions {
            hidden,
            command,
            arguments: arguments.collect(),
        }))
    }
}
