use std::sync::LazyLock;

use indicatif::ProgressStyle;

static STYLE_RUN: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .expect("Error setting progress bar template")
        .progress_chars("=>-")
});

static STYLE_TASK: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_spinner()
        .template("  {spinner:.blue} [{elapsed}] {msg}")
        .expect("Error setting progress bar template")
});

pub(crate) fn get_style_run() -> ProgressStyle {
    STYLE_RUN.clone()
}

pub(crate) fn get_style_task() -> ProgressStyle {
    STYLE_TASK.clone()
}

/// Installs the global subscriber: `RUST_LOG` when set, otherwise `info`
/// (or `debug` when verbose). Log lines are routed through the progress
/// bars so the two don't tear each other apart.
#[cfg(feature = "logging")]
pub fn init_logging(verbose: bool) -> anyhow::Result<()> {
    use tracing_indicatif::IndicatifLayer;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = match std::env::var("RUST_LOG") {
        Ok(v) if !v.trim().is_empty() => EnvFilter::from_default_env(),
        _ => EnvFilter::try_new(if verbose { "kumitate=debug" } else { "kumitate=info" })?,
    };

    let indicatif_layer = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(indicatif_layer.get_stderr_writer()),
        )
        .with(indicatif_layer)
        .try_init()?;

    Ok(())
}

/// Triggers `cancel` on the first interrupt or termination request. A second
/// one exits the process right away. The handlers are registered before
/// this returns.
#[cfg(feature = "tokio")]
pub fn cancel_on_shutdown(cancel: crate::CancelToken) -> std::io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let mut shutdown = {
        let _guard = runtime.enter();
        Shutdown::listen()?
    };

    std::thread::Builder::new()
        .name("kumitate-signals".into())
        .spawn(move || {
            runtime.block_on(async move {
                shutdown.recv().await;
                tracing::warn!("stopping, interrupt again to exit immediately");
                cancel.cancel();

                shutdown.recv().await;
                std::process::exit(130);
            })
        })?;

    Ok(())
}

#[cfg(all(feature = "tokio", unix))]
struct Shutdown {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(all(feature = "tokio", unix))]
impl Shutdown {
    fn listen() -> std::io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) {
        tokio::select! {
            _ = self.interrupt.recv() => {},
            _ = self.terminate.recv() => {},
        }
    }
}

#[cfg(all(feature = "tokio", not(unix)))]
struct Shutdown;

#[cfg(all(feature = "tokio", not(unix)))]
impl Shutdown {
    fn listen() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
