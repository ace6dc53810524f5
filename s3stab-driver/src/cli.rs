//! Command line entry point of the `s3stab` binary.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result, ensure};
use argh::FromArgs;
use secrecy::{ExposeSecret, SecretString};

use crate::backend::{AwsBackend, BoxedBackend};
use crate::config::Config;
use crate::notify::{MailContext, MailNotifier, SmtpMailer};
use crate::{observability, schedule};

/// I/O stability driver for S3-compatible object stores.
#[derive(Debug, FromArgs)]
struct Args {
    /// a YAML test plan, or a directory containing YAML test plans
    #[argh(option)]
    test_input: Option<PathBuf>,

    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// log at debug level
    #[argh(switch, short = 'v')]
    verbose: bool,

    /// use HTTPS for the S3 endpoint (true or false)
    #[argh(option)]
    use_ssl: Option<bool>,

    /// seed for all random decisions
    #[argh(option)]
    seed: Option<u64>,

    /// S3 access key
    #[argh(option)]
    access_key: Option<String>,

    /// S3 secret key
    #[argh(option)]
    secret_key: Option<String>,

    /// host and port of the S3 endpoint, without the scheme
    #[argh(option)]
    endpoint: Option<String>,

    /// number of nodes in the cluster under test
    #[argh(option)]
    number_of_nodes: Option<u64>,

    /// test plan identifier shown in status mails
    #[argh(option)]
    test_plan: Option<String>,

    /// run tests one after another instead of by their start times
    #[argh(switch)]
    sequential_run: bool,
}

impl Args {
    /// Overrides configuration values with the flags given on the command line.
    fn apply(self, config: &mut Config) {
        if let Some(test_input) = self.test_input {
            config.test_input = Some(test_input);
        }
        if let Some(use_ssl) = self.use_ssl {
            config.use_ssl = use_ssl;
        }
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        if let Some(access_key) = self.access_key {
            config.access_key = Some(access_key);
        }
        if let Some(secret_key) = self.secret_key {
            config.secret_key = Some(SecretString::from(secret_key));
        }
        if let Some(endpoint) = self.endpoint {
            config.endpoint = endpoint;
        }
        if let Some(number_of_nodes) = self.number_of_nodes {
            config.number_of_nodes = number_of_nodes;
        }
        if let Some(test_plan) = self.test_plan {
            config.test_plan = Some(test_plan);
        }
        config.sequential_run |= self.sequential_run;
    }
}

/// Bootstrap the runtime and run the configured test plans.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();
    let verbose = args.verbose;

    let mut config = Config::load(args.config.as_deref())?;
    args.apply(&mut config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("s3stab-rt")
        .enable_all()
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing(&config, verbose);
    tracing::debug!(?config);

    let seed = config.seed.unwrap_or_else(rand::random);
    tracing::info!(seed, "seeding workloads");

    let test_input = config
        .test_input
        .as_deref()
        .context("no test plan given, pass --test-input")?;
    ensure!(
        config.number_of_nodes > 0,
        "number_of_nodes must be at least 1"
    );
    let plans = s3stab_plan::load_plans(test_input, config.number_of_nodes)
        .with_context(|| format!("failed to load test plans from {}", test_input.display()))?;

    let access_key = config
        .access_key
        .as_deref()
        .context("no access key given, pass --access-key")?;
    let secret_key = config
        .secret_key
        .as_ref()
        .context("no secret key given, pass --secret-key")?;
    let endpoint = config.endpoint_url();
    let backend: BoxedBackend = Box::new(AwsBackend::new(
        &endpoint,
        &config.region,
        access_key,
        secret_key.expose_secret(),
    ));

    let notifier = if config.mail.is_enabled() {
        let context = MailContext {
            test_plan: config.test_plan.clone(),
            endpoint: endpoint.clone(),
            build_url: config.mail.build_url.clone(),
        };
        let mailer = SmtpMailer::new(&config.mail)?;
        Some(MailNotifier::start(mailer, context, config.mail.interval)?)
    } else {
        tracing::info!("mail notifications are disabled");
        None
    };

    let options = schedule::ScheduleOptions {
        seed,
        sequential_run: config.sequential_run,
    };

    let start = Instant::now();
    let result = runtime.block_on(schedule::run_plans(backend.as_ref(), &plans, options));

    match &result {
        Ok(outcomes) => {
            tracing::info!("all test plans passed");
            schedule::print_summary(outcomes, start.elapsed());
            if let Some(notifier) = notifier {
                notifier.send_passed();
            }
        }
        Err(error) => {
            tracing::error!(error = ?error, seed, "test execution failed");
            if let Some(notifier) = notifier {
                notifier.send_failed();
            }
        }
    }

    result.map(|_| ())
}
