//! Login command

use std::sync::atomic::Ordering;

use anyhow::Result;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::{on_interrupt, open_preferences, share_services};
use crate::cli::output::{OutputFormat, print_formatted};
use crate::config::Config;
use crate::share::{ShareMiddleware, share_store};
use crate::state::{ShareAction, SharePhase, ShareState};

#[derive(Serialize)]
struct LoginResult {
    logged_in: bool,
    environment: String,
}

pub async fn run(format: OutputFormat, quiet: bool) -> Result<()> {
    let config = Config::load()?;
    let prefs = open_preferences()?;
    let services = share_services(&config, prefs)?;
    let environment = services.session.environment().to_string();

    if !services.session.access_token().is_empty() {
        let result = LoginResult {
            logged_in: true,
            environment,
        };
        print_formatted(&result, format, |r| {
            format!("Already logged in ({})", r.environment)
        });
        return Ok(());
    }

    services.session.begin_login();
    if !quiet && format == OutputFormat::Text {
        eprintln!("Waiting for login... (Ctrl-C to cancel)");
    }

    let context = CancellationToken::new();
    let middleware = ShareMiddleware::with_context(services, context.clone());
    let mut store = share_store(ShareState::default(), middleware, None);
    let (interrupted, interrupt_task) =
        on_interrupt(store.subscribe(), store.dispatcher(), ShareAction::Destroy, context);

    store.dispatch(ShareAction::NotLoggedIn);
    store
        .run_until(|s| s.phase == SharePhase::Idle || interrupted.load(Ordering::SeqCst))
        .await;

    let logged_in = !interrupted.load(Ordering::SeqCst);
    interrupt_task.abort();
    store.dispatch(ShareAction::Destroy);

    if !logged_in {
        anyhow::bail!("Login cancelled");
    }

    let result = LoginResult {
        logged_in,
        environment,
    };
    print_formatted(&result, format, |r| format!("Logged in ({})", r.environment));
    Ok(())
}
