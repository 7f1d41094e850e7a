//! Chat command handler: bootstrap, then run the session loop.

use std::io::{self, IsTerminal};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use waifu_core::audio::{AudioPlaybackQueue, DeviceSelector, open_output_device};
use waifu_core::client::{
    ApiClient, HttpChatTransport, HttpSpeechSynthesizer, SpeechSynthesizer, bootstrap,
};
use waifu_core::config::{Config, paths};
use waifu_core::presentation::{Palette, PaletteColors, render_banner, terminal_columns};
use waifu_core::session::{
    DEFAULT_POLL_INTERVAL, RemoteResponder, SessionController, SessionOptions, SessionState,
    StdinLines,
};
use waifu_core::terminal::{StdinTerminal, TerminalIo};
use waifu_core::{interrupt, logging};

const GOODBYE: &str = "👋";

/// Command-line overrides for the chat session.
pub struct ChatOptions<'a> {
    pub no_voice: bool,
    pub debug: bool,
    pub output_device: Option<&'a str>,
}

pub async fn run(config: &Config, opts: &ChatOptions<'_>) -> Result<()> {
    let directive = logging::filter_directive(
        opts.debug,
        std::env::var(logging::ENV_LOG).ok().as_deref(),
        config.log_level.as_deref(),
    );
    let _log_guard = logging::init(&paths::logs_dir(), &directive)?;
    interrupt::init()?;

    let client = ApiClient::new(
        config.effective_base_url()?,
        config.effective_api_key(),
        config.connect_timeout(),
        config.request_timeout(),
    )?;
    let user_id = config.effective_user_id();
    let session = tokio::select! {
        session = bootstrap::bootstrap(
            &client,
            user_id.as_deref(),
            Config::save_user_id,
        ) => session?,
        () = interrupt::wait_for_interrupt() => {
            info!("interrupted during bootstrap");
            println!("\n{GOODBYE}");
            return Ok(());
        }
    };
    info!(session_id = %session.session_id, "session bootstrapped");

    let stdout_tty = io::stdout().is_terminal();
    let truecolor = config.truecolor();
    if stdout_tty && let Some(image) = &session.persona.image {
        match render_banner(image, terminal_columns(), &config.banner_options(), truecolor) {
            Ok(banner) => print!("{banner}"),
            Err(err) => warn!(error = %err, "failed to render persona icon"),
        }
    }

    let palette = if stdout_tty {
        Palette::resolve(
            PaletteColors {
                assistant_label: &config.assistant_label_color,
                user_label: &config.user_label_color,
                face: &config.face_color,
            },
            truecolor,
        )
    } else {
        Palette::plain()
    };

    let voice = !opts.no_voice && config.effective_voice_enabled();
    let audio = if voice {
        let selector = match opts.output_device {
            Some(raw) => raw.parse::<DeviceSelector>().unwrap_or_default(),
            None => config.effective_output_device(),
        };
        let queue = AudioPlaybackQueue::spawn(
            move || open_output_device(&selector),
            config.output_chunk_size,
        )
        .context("Failed to open audio output")?;
        Some(queue)
    } else {
        None
    };

    let speech: Option<Arc<dyn SpeechSynthesizer>> =
        voice.then(|| Arc::new(HttpSpeechSynthesizer::new(client.clone())) as _);
    let responder = RemoteResponder::new(
        Arc::new(HttpChatTransport::new(client)),
        speech,
        session.session_id.clone(),
        Some(session.user.user_id.clone()),
    );

    let terminal = StdinTerminal::new();
    if terminal.is_tty()
        && let Ok(saved) = terminal.attributes()
    {
        interrupt::set_restore_hook(move || {
            let _ = terminal.set_attributes(&saved);
        });
    }

    let options = SessionOptions {
        assistant_name: session.persona.name.clone(),
        character_interval: config.character_interval(),
        faces: config.faces(),
        palette,
        on_start_message_prompt: config.on_start_message_prompt.clone(),
        poll_interval: DEFAULT_POLL_INTERVAL,
    };
    let state = SessionState {
        context_id: session.context_id.clone(),
        user_name: session.user.user_name.clone(),
        relation: session.user.relation.clone(),
    };

    let mut controller =
        SessionController::new(&terminal, io::stdout(), responder, StdinLines::new(), options, state)
            .with_ctrl_c(interrupt::ctrl_c_token());
    if let Some(audio) = audio {
        controller = controller.with_audio(audio);
    }
    let end = controller.run().await?;
    info!(?end, "session ended");
    Ok(())
}
