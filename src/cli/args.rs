//! CLI argument definitions
// (c) 2025 Ross Younger

use std::net::IpAddr;
use std::path::PathBuf;

use crate::policy::ExtensionSet;
use crate::protocol::DEFAULT_PORT;
use crate::server::DEFAULT_DEST_DIR;
use crate::util::TimeFormat;

/// Top-level argument structure
#[derive(Debug, clap::Parser)]
#[command(
    author,
    version,
    about,
    before_help = "e.g.   fling serve --allow txt,png\n       fling send -m hello report.txt"
)]
pub(crate) struct CliArgs {
    /// Enable detailed debug output
    #[arg(short, long, global = true, help_heading = "Output")]
    pub debug: bool,
    /// Quiet mode (errors only)
    #[arg(short, long, global = true, conflicts_with = "debug", help_heading = "Output")]
    pub quiet: bool,
    /// Log to a file. By default the log receives everything printed to stderr.
    /// To override this behaviour, set the environment variable `RUST_LOG_FILE_DETAIL` (same semantics as `RUST_LOG`).
    #[arg(short = 'l', long, global = true, value_name = "FILE", help_heading = "Output")]
    pub log_file: Option<String>,
    /// Specifies the time format to use when printing messages
    #[arg(
        short = 'T',
        long,
        global = true,
        value_name = "FORMAT",
        default_value_t = TimeFormat::Local,
        help_heading = "Output"
    )]
    pub timestamps: TimeFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// What to do this run
#[derive(Debug, clap::Subcommand)]
pub(crate) enum Command {
    /// Runs the receiving server
    Serve {
        /// Address to listen on
        #[arg(long, value_name = "ADDRESS", default_value = "0.0.0.0")]
        bind: IpAddr,
        /// Port to listen on
        #[arg(short, long, value_name = "PORT", default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Comma-separated list of file extensions to accept
        #[arg(long, value_name = "LIST", default_value_t = ExtensionSet::standard())]
        allow: ExtensionSet,
        /// Directory to store received files in (created if absent)
        #[arg(long, value_name = "DIR", default_value = DEFAULT_DEST_DIR)]
        dest_dir: PathBuf,
    },
    /// Connects to a server and sends messages and/or files
    Send {
        /// Server to connect to
        #[arg(long, value_name = "HOST", default_value = "localhost")]
        host: String,
        /// Port to connect to
        #[arg(short, long, value_name = "PORT", default_value_t = DEFAULT_PORT)]
        port: u16,
        /// A text message to send; may be repeated
        #[arg(short, long = "message", value_name = "TEXT")]
        messages: Vec<String>,
        /// Files to send
        #[arg(value_name = "FILE")]
        files: Vec<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::{CliArgs, Command};
    use clap::Parser;
    use pretty_assertions::assert_eq;

    #[test]
    fn serve_defaults() {
        let args = CliArgs::try_parse_from(["fling", "serve"]).unwrap();
        let Command::Serve {
            bind,
            port,
            allow,
            dest_dir,
        } = args.command
        else {
            panic!("expected serve");
        };
        assert_eq!(bind.to_string(), "0.0.0.0");
        assert_eq!(port, crate::protocol::DEFAULT_PORT);
        assert_eq!(allow.to_string(), "jpg,pdf,png,txt");
        assert_eq!(dest_dir.to_string_lossy(), "received_files");
    }

    #[test]
    fn serve_custom_policy() {
        let args =
            CliArgs::try_parse_from(["fling", "serve", "--allow", "TXT, .png", "-p", "9999"])
                .unwrap();
        let Command::Serve { port, allow, .. } = args.command else {
            panic!("expected serve");
        };
        assert_eq!(port, 9999);
        assert_eq!(allow.to_string(), "png,txt");
    }

    #[test]
    fn send_messages_and_files() {
        let args = CliArgs::try_parse_from([
            "fling", "send", "--host", "box", "-m", "hi", "-m", "there", "a.txt", "b.png",
        ])
        .unwrap();
        let Command::Send {
            host,
            messages,
            files,
            ..
        } = args.command
        else {
            panic!("expected send");
        };
        assert_eq!(host, "box");
        assert_eq!(messages, vec!["hi", "there"]);
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn debug_and_quiet_conflict() {
        assert!(CliArgs::try_parse_from(["fling", "-d", "-q", "serve"]).is_err());
    }

    #[test]
    fn global_output_flags_after_subcommand() {
        let args = CliArgs::try_parse_from(["fling", "serve", "--debug"]).unwrap();
        assert!(args.debug);
    }
}
