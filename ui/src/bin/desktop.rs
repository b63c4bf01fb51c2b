use std::path::PathBuf;

use autoterm_core::DEFAULT_CONFIG_FILE;
use autoterm_ui::AssistantEguiView;
use autoterm_ui::AssistantRuntime;
use autoterm_ui::init_tracing;
use autoterm_ui::load_context;
use clap::Parser;
use tracing::info;

#[derive(Debug, Parser)]
#[command(
    name = "autoterm-desktop",
    about = "Opens the AI terminal assistant window."
)]
struct AutotermDesktopCli {
    /// Window title.
    #[arg(long, default_value = "AI Terminal Assistant")]
    title: String,

    /// Configuration file holding the API key.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
}

struct AutotermDesktopApp {
    runtime: AssistantRuntime,
    view: AssistantEguiView,
    // Declared last so workers are torn down after the runtime state.
    _tokio_runtime: tokio::runtime::Runtime,
}

impl eframe::App for AutotermDesktopApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.runtime.pump_events();
        let actions = self.view.render(ctx, self.runtime.store_mut());
        for action in actions {
            self.runtime.apply(action);
        }
    }
}

impl Drop for AutotermDesktopApp {
    fn drop(&mut self) {
        let terminated = self.runtime.shutdown();
        if terminated > 0 {
            info!(terminated, "terminated running sessions on exit");
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = AutotermDesktopCli::parse();
    init_tracing();

    let context = match load_context(&cli.config) {
        Ok(context) => context,
        Err(error) => {
            eprintln!("{error}");
            std::process::exit(1);
        }
    };

    let tokio_runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .build()?;
    let runtime = AssistantRuntime::from_context(&context, tokio_runtime.handle().clone());
    info!(
        provider = runtime.provider_name(),
        language = %context.language,
        cwd = %context.cwd.display(),
        "starting desktop window"
    );

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1400.0, 900.0])
            .with_min_inner_size([860.0, 560.0]),
        ..Default::default()
    };

    eframe::run_native(
        &cli.title,
        native_options,
        Box::new(move |creation_context| {
            let egui_ctx = creation_context.egui_ctx.clone();
            let runtime = runtime.with_repaint_hook(move || egui_ctx.request_repaint());
            Ok(Box::new(AutotermDesktopApp {
                runtime,
                view: AssistantEguiView::default(),
                _tokio_runtime: tokio_runtime,
            }))
        }),
    )?;
    Ok(())
}
