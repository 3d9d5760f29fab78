use anyhow::{Context, Result};
use scmguard::cli::{
    commands::analyze,
    global::Command,
    CommandLineArgs, GlobalArgs,
};
use tokio::runtime::Builder;
use tracing::error;
use tracing_core::metadata::LevelFilter;
use tracing_subscriber::{
    self, fmt, prelude::__tracing_subscriber_SubscriberExt, registry, util::SubscriberInitExt,
};

fn main() -> Result<()> {
    color_backtrace::install();
    let args = CommandLineArgs::parse_args();

    let runtime = Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .enable_all()
        .build()
        .context("Failed to create Tokio runtime")?;
    runtime.block_on(async_main(args))
}

fn setup_logging(global_args: &GlobalArgs) {
    let level = LevelFilter::from_level(global_args.log_level());
    let all_targets = !global_args.quiet && global_args.verbose > 2;
    let filter = if all_targets {
        tracing_subscriber::filter::Targets::new().with_default(LevelFilter::TRACE)
    } else {
        tracing_subscriber::filter::Targets::new()
            .with_default(LevelFilter::ERROR)
            .with_target("scmguard", level)
    };
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_ansi(false)
        .without_time();
    registry().with(fmt_layer).with(filter).init();
}

async fn async_main(args: CommandLineArgs) -> Result<()> {
    setup_logging(&args.global_args);
    let result = match &args.command {
        Command::Analyze(analyze_args) => analyze::run(&args.global_args, analyze_args).await,
    };
    if let Err(e) = &result {
        error!("{e:#}");
    }
    result
}
