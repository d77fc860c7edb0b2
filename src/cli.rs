use clap::Parser;

#[derive(Parser)]
#[command(author, version, about, long_about = None, name = "versecatch")]
pub struct Cli {
    /// Port to run the server on
    #[arg(short = 'p', long, default_value_t = 3030)]
    pub port: u16,

    /// Data directory. Default to $HOME/.versecatch
    #[arg(long)]
    pub data_dir: Option<String>,

    /// Directory holding the translation datasets (KJV.json, ESV.json,
    /// NIV.json). Default to <data-dir>/bibles
    #[arg(long)]
    pub bible_dir: Option<String>,

    /// Gemini API key used for reference extraction
    #[arg(long, env = "GEMINI_API_KEY")]
    pub gemini_api_key: Option<String>,

    /// Oracle model asked to propose references from speech text
    #[arg(long, default_value = "gemini-pro")]
    pub model: String,

    /// Minimum merged transcript length (characters) before the oracle is
    /// consulted; shorter input short-circuits to a no-match
    #[arg(long, default_value_t = 10)]
    pub min_chunk_length: usize,

    /// Seconds a transcript fragment stays eligible for context merging
    #[arg(long, default_value_t = 20)]
    pub context_window_secs: u64,

    /// Milliseconds between successive verse emissions on a stream
    #[arg(long, default_value_t = 100)]
    pub emit_delay_ms: u64,

    /// Enable debug logging for versecatch modules
    #[arg(long)]
    pub debug: bool,
}
