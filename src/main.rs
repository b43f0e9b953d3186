use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow, bail};
use tokio::sync::Notify;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use mailsweep::config::{AccountConfig, Settings};
use mailsweep::error::MailboxError;
use mailsweep::mail::{Mailer, SmtpMailer};
use mailsweep::pipeline::{
    EngineSettings, RuleEngine, RunCounters, SweepScope, SweepStatus, run_once,
};
use mailsweep::rules::{Rule, load_rules};
use mailsweep::scheduler::Scheduler;

const POLL: &str = "poll";
const FULL_SWEEP: &str = "full_sweep";

const USAGE: &str = "usage: mailsweep [--once] [--list-rules]";

#[derive(Debug, Default)]
struct Args {
    /// Run one full sweep and exit.
    once: bool,
    /// Print the loaded rules and exit.
    list_rules: bool,
}

impl Args {
    fn parse() -> anyhow::Result<Self> {
        let mut args = Self::default();
        for arg in std::env::args().skip(1) {
            match arg.as_str() {
                "--once" => args.once = true,
                "--list-rules" => args.list_rules = true,
                "-h" | "--help" => {
                    println!("{USAGE}");
                    std::process::exit(0);
                }
                other => bail!("unknown argument '{other}'\n{USAGE}"),
            }
        }
        Ok(args)
    }
}

/// Everything a sweep needs, shared between the async loop and the
/// blocking sweep thread.
struct Job {
    account: AccountConfig,
    settings: Settings,
    engine_settings: EngineSettings,
    rules: Arc<[Rule]>,
    mailer: Option<SmtpMailer>,
    abort: Arc<AtomicBool>,
}

impl Job {
    /// One sweep with a fresh engine, so counters cover exactly this run.
    fn sweep(&self, scope: SweepScope) -> (Result<SweepStatus, MailboxError>, RunCounters) {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("sweep", %run_id, scope = scope.as_str());
        let _enter = span.enter();

        let mut engine = RuleEngine::new(Arc::clone(&self.rules), self.engine_settings.clone())
            .with_abort(Arc::clone(&self.abort));
        let mailer = self.mailer.as_ref().map(|m| m as &dyn Mailer);
        let result = run_once(&self.account, &self.settings, &mut engine, mailer, scope);
        (result, engine.into_counters())
    }
}

async fn run_job(
    job: &Arc<Job>,
    scope: SweepScope,
) -> anyhow::Result<(Result<SweepStatus, MailboxError>, RunCounters)> {
    let job = Arc::clone(job);
    tokio::task::spawn_blocking(move || job.sweep(scope))
        .await
        .context("Sweep task panicked")
}

fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "mailsweep.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    let args = Args::parse()?;
    let account = AccountConfig::from_env().context("Failed to read account configuration")?;
    let _log_guard = init_tracing(account.log_dir.as_deref());

    let (settings, rules) = load_rules(&account.rules_path)
        .with_context(|| format!("Failed to load rules from {}", account.rules_path.display()))?;

    if args.list_rules {
        for rule in &rules {
            println!("{rule}");
        }
        return Ok(());
    }

    eprintln!("📬 Mailsweep v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   IMAP: {}:{}", account.imap_host, account.imap_port);
    eprintln!("   Rules: {} ({})", rules.len(), account.rules_path.display());
    eprintln!("   Folders: {}", settings.folders.join(", "));
    if !settings.exclude_folders.is_empty() {
        eprintln!("   Excluded: {}", settings.exclude_folders.join(", "));
    }

    let mailer = match SmtpMailer::new(&account) {
        Ok(mailer) => Some(mailer),
        Err(e) => {
            warn!(error = %e, "SMTP unavailable, forward actions will fail");
            None
        }
    };

    let abort = Arc::new(AtomicBool::new(false));
    let shutdown = Arc::new(Notify::new());
    {
        let abort = Arc::clone(&abort);
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, stopping after the current message");
                abort.store(true, Ordering::Relaxed);
                shutdown.notify_one();
            }
        });
    }

    let job = Arc::new(Job {
        engine_settings: EngineSettings {
            mark_as_read_on_move: settings.mark_as_read_on_move,
            forward_from: account.from_address.clone(),
        },
        account,
        settings,
        rules: rules.into(),
        mailer,
        abort: Arc::clone(&abort),
    });

    if args.once {
        let (result, counters) = run_job(&job, SweepScope::Full).await?;
        println!("{}", counters.summary());
        result.context("Sweep failed")?;
        return Ok(());
    }

    let mut scheduler = Scheduler::new();
    scheduler.add(FULL_SWEEP, job.settings.full_sweep_interval(), Duration::ZERO);
    scheduler.add(POLL, job.settings.poll_interval(), job.settings.poll_interval());
    eprintln!(
        "   Schedule: poll every {}m, full sweep every {}h\n",
        job.settings.poll_interval().as_secs() / 60,
        job.settings.full_sweep_interval().as_secs() / 3600,
    );

    while !abort.load(Ordering::Relaxed) {
        let fired = tokio::select! {
            name = scheduler.wait() => name,
            _ = shutdown.notified() => None,
        };
        let Some(name) = fired else { break };

        let scope = if name == FULL_SWEEP {
            // A full sweep covers the polled folders too.
            scheduler.fire(POLL, Instant::now());
            SweepScope::Full
        } else {
            SweepScope::Poll
        };

        let (result, counters) = run_job(&job, scope).await?;
        info!("{}", counters.summary());
        match result {
            Ok(SweepStatus::Completed) => {}
            Ok(SweepStatus::Aborted) => break,
            Err(e) => error!(scope = scope.as_str(), error = %e, "Sweep failed"),
        }
    }

    info!("Mailsweep stopped");
    Ok(())
}
