use burrow_fs::{EncodingHint, SortBy};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Browse local files and archives as one tree", long_about = None)]
pub struct Args {
    /// Configuration file to use instead of the default one.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log debug output to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Treat archive files as plain files.
    #[arg(long, global = true)]
    pub no_archives: bool,

    /// Legacy encoding to prefer for archive entry names.
    #[arg(long, global = true, value_enum)]
    pub encoding: Option<EncodingArg>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// List a directory or an archive.
    Ls {
        location: String,

        /// Include hidden files.
        #[arg(short, long)]
        all: bool,

        /// Show permissions, size and modification time.
        #[arg(short, long)]
        long: bool,

        #[arg(long, value_enum, default_value_t = SortArg::Name)]
        sort: SortArg,

        /// Reverse the sort order.
        #[arg(short, long)]
        reverse: bool,
    },

    /// Print a directory or an archive recursively.
    Tree {
        location: String,

        /// Maximum depth to descend; unlimited when omitted.
        #[arg(long)]
        depth: Option<usize>,

        /// Include hidden files.
        #[arg(short, long)]
        all: bool,

        /// Do not descend into archives.
        #[arg(long)]
        no_enter: bool,
    },

    /// Write a file's content to stdout.
    Cat { location: String },

    /// Show a file's attributes.
    Stat { location: String },

    /// Create a directory.
    Mkdir { location: String },

    /// Delete a file or an empty directory.
    Rm { location: String },

    /// Move a file, copying across backends when needed.
    Mv { source: String, destination: String },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortArg {
    Name,
    Size,
    Modified,
    Extension,
}

impl From<SortArg> for SortBy {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Name => SortBy::Name,
            SortArg::Size => SortBy::Size,
            SortArg::Modified => SortBy::Modified,
            SortArg::Extension => SortBy::Extension,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncodingArg {
    Auto,
    Japanese,
    ChineseSimplified,
    ChineseTraditional,
    Korean,
    None,
}

impl From<EncodingArg> for EncodingHint {
    fn from(arg: EncodingArg) -> Self {
        match arg {
            EncodingArg::Auto => EncodingHint::Auto,
            EncodingArg::Japanese => EncodingHint::Japanese,
            EncodingArg::ChineseSimplified => EncodingHint::ChineseSimplified,
            EncodingArg::ChineseTraditional => EncodingHint::ChineseTraditional,
            EncodingArg::Korean => EncodingHint::Korean,
            EncodingArg::None => EncodingHint::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_command_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_ls() {
        let args = Args::parse_from(["burrow", "--no-archives", "ls", "-la", "--sort", "size", "/tmp"]);
        assert!(args.no_archives);
        match args.command {
            Commands::Ls { location, all, long, sort, reverse } => {
                assert_eq!(location, "/tmp");
                assert!(all && long && !reverse);
                assert_eq!(sort, SortArg::Size);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_global_after_subcommand() {
        let args = Args::parse_from(["burrow", "tree", "x.zip", "--depth", "2", "--encoding", "japanese"]);
        assert_eq!(args.encoding, Some(EncodingArg::Japanese));
        assert!(matches!(args.command, Commands::Tree { depth: Some(2), .. }));
    }
}
