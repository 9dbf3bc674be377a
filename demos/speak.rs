use std::path::PathBuf;
use std::time::{Duration, Instant};

use tts_hub::{
    discover_voices, BackendKind, ControllerEvent, EngineConfig, PlaybackController, PlaybackState,
    SpeechRequest,
};

/// Usage: `cargo run --example speak -- [BACKEND] [TEXT...]`
fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = match std::env::var_os("TTS_HUB_CONFIG") {
        Some(path) => EngineConfig::from_json_file(&PathBuf::from(path))?,
        None => EngineConfig::default(),
    };

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let backend = match args.first().map(|a| a.parse::<BackendKind>()) {
        Some(Ok(kind)) => {
            args.remove(0);
            Some(kind)
        }
        _ => None,
    };
    let text = if args.is_empty() {
        "Hello! This is tts-hub speaking through the first backend it could find.".to_string()
    } else {
        args.join(" ")
    };

    let scan_start = Instant::now();
    let catalog = discover_voices(&config);
    println!(
        "Found {} voices from {:?} in {:.2?}",
        catalog.len(),
        catalog.backends(),
        scan_start.elapsed()
    );
    for (code, name) in catalog.languages() {
        println!("  {code}  {name}");
    }

    let voice = match backend {
        Some(kind) => catalog.best_for_backend(kind),
        None => catalog.default_voice_for("en"),
    }
    .cloned();
    let Some(voice) = voice else {
        println!("No voices installed");
        return Ok(());
    };
    println!("Speaking with {} ({}, {})", voice.name, voice.backend, voice.voice_id);

    let controller = PlaybackController::spawn(config, catalog)?;
    let events = controller.subscribe()?;
    let request = SpeechRequest::builder()
        .text(text)
        .voice(voice.voice_id)
        .rate(0)
        .pitch(0)
        .volume(75)
        .build()?;
    if !controller.speak(request) {
        println!("Speech failed to start (state: {})", controller.state());
        return Ok(());
    }

    let speak_start = Instant::now();
    while let Ok(event) = events.recv_timeout(Duration::from_secs(120)) {
        match event {
            ControllerEvent::Started { preview } => println!("> {preview}"),
            ControllerEvent::StateChanged(PlaybackState::Speaking) => {}
            ControllerEvent::StateChanged(state) => {
                println!("Finished ({state}) after {:.2?}", speak_start.elapsed());
                break;
            }
            ControllerEvent::CatalogUpdated(_) => {}
        }
    }
    Ok(())
}
