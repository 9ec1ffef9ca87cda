//! Command-line arguments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "vimsicles", version)]
#[command(about = "Approve-first file transfers over the local network")]
pub struct Cli {
    /// Use this config file instead of the per-user one.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Listen for transfers and ask before accepting each one.
    Receive(ReceiveArgs),
    /// Send files to a listening peer.
    Send(SendArgs),
}

#[derive(Args, Debug)]
pub struct ReceiveArgs {
    /// Port to listen on.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory for received files.
    #[arg(short, long, value_name = "DIR")]
    pub dest: Option<PathBuf>,

    /// Accept every incoming transfer without asking.
    #[arg(long)]
    pub auto_approve: bool,

    /// Exit after the first transfer finishes.
    #[arg(long)]
    pub once: bool,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Receiver host name or IP address.
    pub host: String,

    /// Files to send; more than one is sent as a folder.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Receiver port.
    #[arg(short, long)]
    pub port: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_receive() {
        let cli = Cli::parse_from(["vimsicles", "receive", "-p", "9000", "--once"]);
        match cli.command {
            Command::Receive(args) => {
                assert_eq!(args.port, Some(9000));
                assert!(args.once);
                assert!(!args.auto_approve);
                assert!(args.dest.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parse_send() {
        let cli = Cli::parse_from(["vimsicles", "send", "192.168.1.20", "a.txt", "b.txt"]);
        match cli.command {
            Command::Send(args) => {
                assert_eq!(args.host, "192.168.1.20");
                assert_eq!(args.files, vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")]);
                assert_eq!(args.port, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn send_requires_files() {
        assert!(Cli::try_parse_from(["vimsicles", "send", "10.0.0.1"]).is_err());
    }
}
