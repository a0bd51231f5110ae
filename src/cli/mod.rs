mod app;

use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Subcommand, ValueEnum};

use crate::config::ConfigManager;
use crate::history::{DownloadHistory, HistoryStatus};
use crate::media::{parse_language_list, DownloadMode, Quality};

pub use app::{App, DownloadRequest, HistoryQuery};

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show title, uploader, duration and views of a video
    Info { url: String },

    /// List the subtitle languages a video offers
    Subs { url: String },

    /// Download a video, its subtitles, or both
    Download(DownloadArgs),

    /// Show or edit the download history
    History(HistoryArgs),

    /// List recently used URLs
    Recent,

    /// Print the tail of today's log file
    Logs {
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: usize,
    },

    /// Check that yt-dlp and ffmpeg are installed and audit the cookies file
    Check,

    /// Inspect or reset the configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    Video,
    Subs,
    Both,
}

impl From<ModeArg> for DownloadMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Video => DownloadMode::VideoOnly,
            ModeArg::Subs => DownloadMode::SubtitlesOnly,
            ModeArg::Both => DownloadMode::VideoAndSubtitles,
        }
    }
}

#[derive(Args, Debug)]
pub struct DownloadArgs {
    pub url: String,

    /// What to download (defaults to the configured mode)
    #[arg(short, long, value_enum)]
    pub mode: Option<ModeArg>,

    /// best, worst, 720p, 480p or 360p
    #[arg(short, long)]
    pub quality: Option<String>,

    /// Subtitle languages, comma separated (e.g. ko,en)
    #[arg(short, long)]
    pub langs: Option<String>,

    /// Destination directory
    #[arg(short, long)]
    pub output: Option<String>,
}

impl From<DownloadArgs> for DownloadRequest {
    fn from(args: DownloadArgs) -> Self {
        Self {
            url: args.url,
            mode: args.mode.map(DownloadMode::from),
            quality: args.quality.as_deref().map(Quality::parse_lossy),
            langs: args.langs.as_deref().map(parse_language_list),
            output: args.output,
        }
    }
}

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Number of records to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Only show records with this status (success, failed, cancelled)
    #[arg(short, long)]
    pub status: Option<HistoryStatus>,

    /// Case-insensitive search over titles and URLs
    #[arg(long)]
    pub search: Option<String>,

    /// Print totals instead of records
    #[arg(long)]
    pub stats: bool,

    /// Delete every record
    #[arg(long, conflicts_with_all = ["delete", "stats"])]
    pub clear: bool,

    /// Delete the record at this index (0 is the newest)
    #[arg(long)]
    pub delete: Option<usize>,
}

impl From<HistoryArgs> for HistoryQuery {
    fn from(args: HistoryArgs) -> Self {
        if args.clear {
            Self::Clear
        } else if let Some(index) = args.delete {
            Self::Delete(index)
        } else if args.stats {
            Self::Stats
        } else {
            Self::List {
                limit: args.limit,
                status: args.status,
                search: args.search,
            }
        }
    }
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigAction {
    /// Print the active configuration
    Show,
    /// Restore every setting to its default
    Reset,
    /// Print the config file location
    Path,
}

pub async fn run(command: Command, config: ConfigManager, history: DownloadHistory) -> Result<ExitCode> {
    let mut app = App::new(config, history);

    let ok = match command {
        Command::Info { url } => app.info(&url).await.map(|_| true)?,
        Command::Subs { url } => app.subtitles(&url).await.map(|_| true)?,
        Command::Download(args) => app.download(args.into()).await?.is_success(),
        Command::History(args) => app.history(args.into()).map(|_| true)?,
        Command::Recent => {
            app.recent();
            true
        }
        Command::Logs { lines } => app.logs(lines).map(|_| true)?,
        Command::Check => app.check().await,
        Command::Config { action } => app.config(action).map(|_| true)?,
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
