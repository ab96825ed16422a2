pub const USAGE_MSG: &str = "Usage: jobpen [options] [--] <command> [<argument>...]";

const DESCRIPTOR: &str = "Run <command> in its own process group and supervise it.
Connecting to the unix socket jobpen-<pid>.sock in the temporary directory
kills the command together with everything it spawned.";

const HELP_MSG: &str = "Options:
--hidden                        attach the command's stdio to /dev/null
                                instead of the invoking console

-h, --help                      display this help
-V, --version                   display version
";

pub fn long_help_message() -> String {
    format!("{USAGE_MSG}\n\n{DESCRIPTOR}\n\n{HELP_MSG}")
}
