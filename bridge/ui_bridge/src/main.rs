use std::path::PathBuf;
use std::process;

use clap::Parser;
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use ui_bridge_runtime::config::{RENDERER_ENV, SOCKET_ENV};
use ui_bridge_runtime::protocol::normalize_event;
use ui_bridge_runtime::{
    BridgeConfig, BridgeError, BridgeEvent, InboundMessage, Session, VNode, WidgetEvent,
    WindowEvent, element, signal, text, text_fn,
};

const LOG_ENV: &str = "UI_BRIDGE_LOG";

#[derive(Parser)]
#[command(name = "ui-bridge")]
#[command(about = "Drives a native renderer process over a framed msgpack socket")]
struct Cli {
    /// Renderer executable to launch
    #[arg(long, env = RENDERER_ENV)]
    renderer: Option<PathBuf>,

    /// Socket path shared with the renderer
    #[arg(long, env = SOCKET_ENV)]
    socket: Option<PathBuf>,

    /// Connect to a renderer that is already listening
    #[arg(long)]
    attach: bool,

    /// Window title
    #[arg(long)]
    title: Option<String>,
}

impl Cli {
    fn into_config(self) -> BridgeConfig {
        let mut config = BridgeConfig::from_env();
        if let Some(renderer) = self.renderer {
            config.renderer = Some(renderer);
        }
        if let Some(socket) = self.socket {
            config.socket_path = socket;
        }
        config.attach |= self.attach;
        config.title = self.title.or(config.title).or_else(|| Some("ui-bridge".to_string()));
        config
    }
}

fn main() {
    init_logging();

    match run(Cli::parse()) {
        Ok(code) => process::exit(code),
        Err(err) => {
            error!(error = %err, "ui-bridge fatal error");
            process::exit(err.exit_code());
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(cli: Cli) -> Result<i32, BridgeError> {
    let config = cli.into_config();
    info!(
        socket = %config.socket_path.display(),
        attach = config.attach,
        "starting ui bridge"
    );

    let session = Session::new(config);
    session.on_message(log_message);

    let root = session.root(None);
    session.render(&counter_view(), &root)?;

    session.connect()?;
    let end = session.run()?;
    info!(?end, "session finished");
    Ok(end.exit_code())
}

fn log_message(message: &InboundMessage) {
    let InboundMessage::UiEvent { event } = message else {
        return;
    };

    match normalize_event(event) {
        BridgeEvent::Window(WindowEvent::Resized { width, height }) => {
            info!(width, height, "window resized");
        }
        BridgeEvent::Window(WindowEvent::CloseRequested) => info!("window close requested"),
        BridgeEvent::Window(WindowEvent::FocusChanged(focused)) => info!(focused, "focus changed"),
        BridgeEvent::WidgetAction(_) | BridgeEvent::Unknown => {}
    }
}

fn counter_view() -> VNode {
    let count = signal(0_i64);
    let volume = signal(0.5_f64);

    let shown = count.clone();
    let increment = count.clone();
    let reset = count.clone();
    let level = volume.clone();
    let slider_value = volume.clone();
    let slider_changes = volume.clone();

    element("column")
        .prop("style", json!({"padding": 16, "gap": 12}))
        .child(text("Counter"))
        .child(text_fn(move || format!("Clicked {} times", shown.get())))
        .child(
            element("row")
                .prop("gap", 8)
                .child(
                    element("button")
                        .prop("text", "Increment")
                        .on("onClick", move |_: &WidgetEvent| { increment.set(increment.get() + 1); })
                        .build(),
                )
                .child(
                    element("button")
                        .prop("text", "Reset")
                        .on("onClick", move |_: &WidgetEvent| { reset.set(0); })
                        .build(),
                )
                .build(),
        )
        .child(
            element("slider")
                .prop("min", 0)
                .prop("max", 1)
                .prop("step", 0.05)
                .reactive("value", move || slider_value.get())
                .on("onChange", move |event: &WidgetEvent| {
                    if let Some(value) = event.value.as_ref().and_then(|value| value.as_f64()) {
                        slider_changes.set(value);
                    }
                })
                .build(),
        )
        .child(element("progress").reactive("progress", move || level.get()).build())
        .build()
}
