use std::path::PathBuf;
use std::time::Duration;

use autoterm_core::DEFAULT_CONFIG_FILE;
use autoterm_ui::AssistantRuntime;
use autoterm_ui::SessionLifecycle;
use autoterm_ui::init_tracing;
use autoterm_ui::load_context;
use clap::Parser;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Parser)]
#[command(
    name = "autoterm-app",
    about = "Asks for the next command toward a goal and optionally runs it, without opening a window."
)]
struct AutotermAppCli {
    /// Configuration file holding the API key.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Goal to request a command for.
    #[arg(long)]
    goal: String,

    /// Run the suggested command and exit with its status.
    #[arg(long)]
    execute: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = AutotermAppCli::parse();
    init_tracing();

    let context = match load_context(&cli.config) {
        Ok(context) => context,
        Err(error) => {
            eprintln!("{error}");
            std::process::exit(1);
        }
    };

    let mut runtime = AssistantRuntime::from_context(&context, tokio::runtime::Handle::current());
    let mut printed = 0_usize;
    print_new_output(&runtime, &mut printed);

    runtime.start(cli.goal);
    while runtime.has_pending_work() {
        runtime.pump_events();
        print_new_output(&runtime, &mut printed);
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    runtime.pump_events();
    print_new_output(&runtime, &mut printed);

    if !cli.execute {
        return Ok(());
    }

    let Some(session_id) = runtime.execute() else {
        print_new_output(&runtime, &mut printed);
        std::process::exit(1);
    };

    let final_exit_code = loop {
        runtime.pump_events();
        print_new_output(&runtime, &mut printed);

        if let Some(record) = runtime.store().session(session_id)
            && let SessionLifecycle::Finished { exit_code, .. } = record.lifecycle
        {
            break exit_code;
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    };

    match final_exit_code {
        Some(0) => Ok(()),
        Some(code) => std::process::exit(i32::try_from(code).unwrap_or(1)),
        None => std::process::exit(1),
    }
}

fn print_new_output(runtime: &AssistantRuntime, printed: &mut usize) {
    let text = runtime.store().output_text();
    if let Some(fresh) = text.get(*printed..)
        && !fresh.is_empty()
    {
        print!("{fresh}");
        *printed = text.len();
    }
}
