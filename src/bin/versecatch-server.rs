use clap::Parser;
#[allow(unused_imports)]
use colored::Colorize;
use dirs::home_dir;
use futures::pin_mut;
use port_check::is_local_ipv4_port_free;
use std::{
    fs,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use tokio::signal;
use tracing::{debug, error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use versecatch_server::{
    cli::Cli, start_sweep_task, AppState, ContextCache, GeminiExtractor, Server, TranslationStore,
    SWEEP_INTERVAL,
};

const DISPLAY: &str = r"
                                         __       __
 _   _____  _____________  _________ _/ /______/ /_
| | / / _ \/ ___/ ___/ _ \/ ___/ __ `/ __/ ___/ __ \
| |/ /  __/ /  (__  )  __/ /__/ /_/ / /_/ /__/ / / /
|___/\___/_/  /____/\___/\___/\__,_/\__/\___/_/ /_/

";

fn get_base_dir(custom_path: &Option<String>) -> anyhow::Result<PathBuf> {
    let default_path = home_dir()
        .ok_or_else(|| anyhow::anyhow!("failed to get home directory"))?
        .join(".versecatch");

    let base_dir = custom_path
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or(default_path);

    fs::create_dir_all(&base_dir)?;
    Ok(base_dir)
}

fn setup_logging(local_data_dir: &PathBuf, cli: &Cli) -> anyhow::Result<WorkerGuard> {
    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("versecatch")
        .filename_suffix("log")
        .max_log_files(5)
        .build(local_data_dir)?;

    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let make_env_filter = || {
        let filter = EnvFilter::from_default_env()
            .add_directive("info".parse().unwrap())
            .add_directive("hyper=warn".parse().unwrap())
            .add_directive("reqwest=warn".parse().unwrap());

        if cli.debug {
            filter.add_directive("versecatch_server=debug".parse().unwrap())
        } else {
            filter
        }
    };

    let timer =
        tracing_subscriber::fmt::time::ChronoLocal::new("%Y-%m-%dT%H:%M:%S%.6fZ".to_string());

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stdout)
                .with_timer(timer.clone())
                .with_filter(make_env_filter()),
        )
        .with(
            fmt::layer()
                .with_writer(file_writer)
                .with_timer(timer)
                .with_filter(make_env_filter()),
        )
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let local_data_dir = get_base_dir(&cli.data_dir)?;
    let _log_guard = setup_logging(&local_data_dir, &cli)?;

    debug!("starting versecatch server");

    if !is_local_ipv4_port_free(cli.port) {
        error!(
            "you're likely already running a versecatch instance on port {}, close it and restart or use a different port",
            cli.port
        );
        return Err(anyhow::anyhow!("port already in use"));
    }

    let api_key = cli.gemini_api_key.clone().ok_or_else(|| {
        anyhow::anyhow!("--gemini-api-key or GEMINI_API_KEY required for reference extraction")
    })?;

    let bible_dir = cli
        .bible_dir
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| local_data_dir.join("bibles"));

    let store = Arc::new(TranslationStore::load(&bible_dir)?);

    let context_cache = Arc::new(ContextCache::new(Duration::from_secs(
        cli.context_window_secs,
    )));
    let _sweep_task = start_sweep_task(context_cache.clone(), SWEEP_INTERVAL);

    let extractor = Arc::new(GeminiExtractor::new(api_key, cli.model.clone()));

    println!("\n\n{}", DISPLAY.truecolor(147, 112, 219).bold());
    println!(
        "\n{}",
        "hear a verse, see the verse".bright_yellow().italic()
    );
    println!(
        "{}\n\n",
        "open source | offline datasets | developer friendly".bright_green()
    );

    println!("┌────────────────────────┬────────────────────────────────────┐");
    println!("│ setting                │ value                              │");
    println!("├────────────────────────┼────────────────────────────────────┤");
    println!("│ port                   │ {:<34} │", cli.port);
    println!(
        "│ data directory         │ {:<34} │",
        local_data_dir.to_string_lossy()
    );
    println!(
        "│ bible directory        │ {:<34} │",
        bible_dir.to_string_lossy()
    );
    println!(
        "│ translations           │ {:<34} │",
        store.translations().join(", ")
    );
    println!("│ oracle model           │ {:<34} │", cli.model);
    println!(
        "│ context window         │ {:<34} │",
        format!("{} seconds", cli.context_window_secs)
    );
    println!("│ min chunk length       │ {:<34} │", cli.min_chunk_length);
    println!(
        "│ emit delay             │ {:<34} │",
        format!("{} ms", cli.emit_delay_ms)
    );
    println!("│ debug mode             │ {:<34} │", cli.debug);
    println!(
        "│ gemini key             │ {:<34} │",
        if cli.gemini_api_key.is_some() {
            "set (masked)"
        } else {
            "not set"
        }
    );
    println!("└────────────────────────┴────────────────────────────────────┘");

    let state = Arc::new(AppState {
        store,
        context_cache,
        extractor,
        app_start_time: chrono::Utc::now(),
        min_chunk_length: cli.min_chunk_length,
        emit_delay: Duration::from_millis(cli.emit_delay_ms),
    });

    let server = Server::new(
        state,
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), cli.port),
    );

    let server_future = server.start();
    pin_mut!(server_future);

    let ctrl_c_future = signal::ctrl_c();
    pin_mut!(ctrl_c_future);

    tokio::select! {
        result = &mut server_future => {
            match result {
                Ok(_) => info!("server stopped normally"),
                Err(e) => error!("server stopped with error: {:?}", e),
            }
        }
        _ = ctrl_c_future => {
            info!("received ctrl+c, initiating shutdown");
        }
    }

    info!("shutdown complete");

    Ok(())
}
