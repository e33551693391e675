use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FrameCount, StreamConfig};
use rehearse_core::models::{Project, ProjectInput};
use rehearse_core::{
    Backend, BackendClient, CallController, CallOutcome, CallState, CallUpdate, StaticCredential,
    TerminationReason, UserContext, UserIdentity,
};
use rehearse_native_utils::audio::{self, AGENT_PCM16_SAMPLE_RATE};
use rehearse_service::call_input::{CallCommand, spawn_end_call};
use rehearse_service::config::{Config, INPUT_CHUNK_SIZE, OUTPUT_CHUNK_SIZE, OUTPUT_LATENCY_MS};
use rehearse_service::convai_adapter::{AudioLink, ConvaiTransport, Playback};
use rehearse_service::microphone::CpalMicrophone;
use ringbuf::traits::{Consumer, Producer, Split};
use rubato::Resampler;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(about = "Practice interviews and pitches with a voice agent")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show your profile and credit balance
    Profile,
    #[command(subcommand)]
    Projects(ProjectsCommand),
    #[command(subcommand)]
    Sessions(SessionsCommand),
    #[command(subcommand)]
    Credits(CreditsCommand),
    /// List audio input and output devices
    Devices,
    /// Start a voice practice call for a project
    Call { project_id: String },
}

#[derive(Subcommand)]
enum ProjectsCommand {
    List,
    Show {
        project_id: String,
    },
    /// Create a project from a briefing, pasted or as a PDF
    Create {
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        text: Option<String>,
        #[arg(long)]
        file: Option<PathBuf>,
    },
    Rename {
        project_id: String,
        title: String,
    },
    Delete {
        project_id: String,
    },
}

#[derive(Subcommand)]
enum SessionsCommand {
    /// Show a session's transcript and feedback
    Show {
        project_id: String,
        session_id: String,
    },
}

#[derive(Subcommand)]
enum CreditsCommand {
    /// Ask an admin for more credits
    Request { credits: u32 },
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load application configuration")?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    let cli = Cli::parse();

    if let Command::Devices = cli.command {
        println!("Inputs:\n{}", rehearse_native_utils::device::get_available_inputs()?);
        println!("Outputs:\n{}", rehearse_native_utils::device::get_available_outputs()?);
        return Ok(());
    }

    let backend: Arc<dyn Backend> = Arc::new(BackendClient::new(&config.api_url));
    let identity = config.user_id.clone().map(|uid| UserIdentity {
        uid,
        display_name: config.display_name.clone(),
    });
    let context = UserContext::new(
        identity,
        Arc::new(StaticCredential::new(config.id_token.clone())),
    );
    let token = context.bearer_token().await?;

    match cli.command {
        Command::Profile => {
            let profile = context
                .refresh_profile(backend.as_ref())
                .await
                .context("Failed to load profile")?;
            println!("{} <{}>", context.display_name(), profile.email.unwrap_or_default());
            println!("Credits: {}", profile.credits);
        }
        Command::Projects(ProjectsCommand::List) => {
            let projects = backend.list_projects(&token).await?;
            if projects.is_empty() {
                println!("No projects yet.");
            }
            for project in projects {
                println!(
                    "{}  {}  [{}]  {} sessions",
                    project.project_id,
                    project.title,
                    use_case_label(&project),
                    project.practice_sessions.len()
                );
            }
        }
        Command::Projects(ProjectsCommand::Show { project_id }) => {
            let project = backend.get_project(&token, &project_id).await?;
            print_project(&project);
        }
        Command::Projects(ProjectsCommand::Create { text, file }) => {
            let input = match (text, file) {
                (Some(text), _) => ProjectInput::Text(text),
                (None, Some(path)) => {
                    let bytes = tokio::fs::read(&path)
                        .await
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    let file_name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "briefing.pdf".to_string());
                    ProjectInput::Pdf { file_name, bytes }
                }
                (None, None) => anyhow::bail!("either --text or --file is required"),
            };
            let project = backend.create_project(&token, input).await?;
            println!("Created project {}: {}", project.project_id, project.title);
        }
        Command::Projects(ProjectsCommand::Rename { project_id, title }) => {
            backend.rename_project(&token, &project_id, &title).await?;
            println!("Renamed {}.", project_id);
        }
        Command::Projects(ProjectsCommand::Delete { project_id }) => {
            backend.delete_project(&token, &project_id).await?;
            println!("Deleted {}.", project_id);
        }
        Command::Sessions(SessionsCommand::Show {
            project_id,
            session_id,
        }) => {
            let session = backend.get_session(&token, &project_id, &session_id).await?;
            println!(
                "Session {} ({}s)\n\n{}",
                session.session_id, session.duration_seconds, session.transcript
            );
            match session.feedback {
                Some(feedback) => {
                    println!("\nAverage score: {:.0}", feedback.average_score());
                    println!("Communication: {:.0}", feedback.communication_score);
                    println!("Content mastery: {:.0}", feedback.content_mastery_score);
                    println!("Engagement and delivery: {:.0}", feedback.engagement_delivery_score);
                    println!("Resilience: {:.0}", feedback.resilience_score);
                    println!("\nStrengths: {}", feedback.qualitative_strengths);
                    println!("Improvements: {}", feedback.qualitative_improvements);
                    println!("Notes: {}", feedback.context_specific_feedback);
                }
                None => println!("\nFeedback is still being generated."),
            }
        }
        Command::Credits(CreditsCommand::Request { credits }) => {
            let request_id = backend.request_credits(&token, credits).await?;
            println!("Requested {} credits (request {}).", credits, request_id);
        }
        Command::Call { project_id } => {
            let project = backend
                .get_project(&token, &project_id)
                .await
                .context("Failed to load project")?;
            context
                .refresh_profile(backend.as_ref())
                .await
                .context("Failed to load profile")?;
            run_call(&config, backend, context, project).await?;
        }
        Command::Devices => {}
    }
    Ok(())
}

fn use_case_label(project: &Project) -> String {
    project
        .detected_use_case
        .map(|u| u.to_string())
        .unwrap_or_else(|| "General".to_string())
}

fn print_project(project: &Project) {
    println!("{}  {}", project.project_id, project.title);
    println!("Use case: {}", use_case_label(project));
    if !project.description().is_empty() {
        println!("{}", project.description());
    }
    if !project.key_points_text().is_empty() {
        println!("\nKey points:\n{}", project.key_points_text());
    }
    println!("\nSessions:");
    for session in project.sessions_newest_first() {
        let when = session
            .created_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        let score = session
            .feedback
            .as_ref()
            .map(|f| format!("{:.0}", f.average_score()))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {}  {}  {}s  score {}",
            session.session_id, when, session.duration_seconds, score
        );
    }
}

fn describe_outcome(outcome: &CallOutcome) -> String {
    match outcome {
        CallOutcome::Saved(receipt) => format!(
            "Session {} saved: {} credits deducted, {} remaining.",
            receipt.session_id, receipt.credits_deducted, receipt.balance
        ),
        CallOutcome::Skipped(reason) => format!("Session not saved: {}.", reason),
        CallOutcome::SaveFailed(e) => format!("Session could not be saved: {}", e),
        CallOutcome::Discarded => "Session discarded.".to_string(),
        CallOutcome::Aborted => "Call cancelled before it connected.".to_string(),
    }
}

fn report_finished(
    controller: &CallController,
    reason: Option<TerminationReason>,
    outcome: &CallOutcome,
) {
    if let Some(reason) = reason {
        println!("Call ended: {}.", reason);
    }
    if let (CallOutcome::Aborted, Some(error)) = (outcome, controller.snapshot().last_error) {
        println!("{}", error);
    }
    println!("{}", describe_outcome(outcome));
}

fn end_in_background(controller: &Arc<CallController>) {
    println!("Ending the call and saving... (x to discard instead)");
    // The outcome arrives as a Finished update.
    drop(spawn_end_call(controller));
}

async fn run_call(
    config: &Config,
    backend: Arc<dyn Backend>,
    context: UserContext,
    project: Project,
) -> Result<()> {
    // Microphone capture, downmixed to mono.
    let input = rehearse_native_utils::device::get_or_default_input(config.input_device.as_deref())
        .context("Failed to get audio input device")?;
    tracing::info!("Using input device: {:?}", &input.name()?);
    let input_config = input
        .default_input_config()
        .context("Failed to get default input config")?;
    let input_config = StreamConfig {
        channels: input_config.channels(),
        sample_rate: input_config.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(FrameCount::from(INPUT_CHUNK_SIZE as u32)),
    };
    let input_channel_count = input_config.channels as usize;
    let input_sample_rate = f64::from(input_config.sample_rate.0);
    tracing::debug!("Input stream config: {:?}", &input_config);

    let (mic_tx, mic_rx) = mpsc::channel::<Vec<f32>>(1024);
    let input_stream = input.build_input_stream(
        &input_config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            if let Err(e) = mic_tx.try_send(audio::downmix(data, input_channel_count)) {
                tracing::warn!("Failed to send audio data to buffer: {:?}", e);
            }
        },
        move |err| tracing::error!("An error occurred on input stream: {}", err),
        None,
    )?;
    input_stream.play()?;

    // Agent speech playback.
    let output =
        rehearse_native_utils::device::get_or_default_output(config.output_device.as_deref())
            .context("Failed to get audio output device")?;
    tracing::info!("Using output device: {:?}", &output.name()?);
    let output_config = output
        .default_output_config()
        .context("Failed to get default output config")?;
    let output_config = StreamConfig {
        channels: output_config.channels(),
        sample_rate: output_config.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(FrameCount::from(OUTPUT_CHUNK_SIZE as u32)),
    };
    let output_channel_count = output_config.channels as usize;
    let output_sample_rate = f64::from(output_config.sample_rate.0);
    tracing::debug!("Output stream config: {:?}", &output_config);

    let audio_out_buffer =
        audio::shared_buffer(output_sample_rate as usize * OUTPUT_LATENCY_MS / 1000);
    let (mut audio_out_tx, mut audio_out_rx) = audio_out_buffer.split();
    let agent_speaking = Arc::new(AtomicBool::new(false));
    let flush_playback = Arc::new(AtomicBool::new(false));

    let output_stream = output.build_output_stream(
        &output_config,
        {
            let agent_speaking = agent_speaking.clone();
            let flush_playback = flush_playback.clone();
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if flush_playback.swap(false, Ordering::SeqCst) {
                    audio_out_rx.clear();
                }
                let mut audible = false;
                for frame in data.chunks_mut(output_channel_count.max(1)) {
                    let sample = audio_out_rx.try_pop().unwrap_or(0.0);
                    audible |= sample != 0.0;
                    frame.fill(sample);
                }
                agent_speaking.store(audible, Ordering::SeqCst);
            }
        },
        move |err| tracing::error!("An error occurred on output stream: {}", err),
        None,
    )?;
    output_stream.play()?;

    let (playback_tx, mut playback_rx) = mpsc::channel::<Playback>(256);
    let playback = tokio::spawn({
        let flush_playback = flush_playback.clone();
        async move {
            let mut resampler = audio::create_resampler(AGENT_PCM16_SAMPLE_RATE, output_sample_rate, 100)?;
            while let Some(item) = playback_rx.recv().await {
                match item {
                    Playback::Start { sample_rate } => {
                        resampler = audio::create_resampler(f64::from(sample_rate), output_sample_rate, 100)?;
                    }
                    Playback::Interrupt => flush_playback.store(true, Ordering::SeqCst),
                    Playback::Audio(fragment) => {
                        let samples = audio::decode_f32(&fragment);
                        let chunk_size = resampler.input_frames_next();
                        for chunk in audio::split_for_chunks(&samples, chunk_size) {
                            match resampler.process(&[chunk.as_slice()], None) {
                                Ok(out) => {
                                    for sample in out.first().into_iter().flatten() {
                                        if audio_out_tx.try_push(*sample).is_err() {
                                            tracing::warn!("Playback buffer full, dropping agent audio");
                                            break;
                                        }
                                    }
                                }
                                Err(e) => tracing::warn!("Failed to resample agent audio: {}", e),
                            }
                        }
                    }
                }
            }
            anyhow::Ok(())
        }
    });

    let audio_link = AudioLink {
        microphone: Arc::new(AsyncMutex::new(mic_rx)),
        input_sample_rate,
        playback: playback_tx,
        agent_speaking,
    };
    let transport = Arc::new(
        ConvaiTransport::new(audio_link).with_base_url(config.convai_base_url.clone()),
    );
    let microphone = Arc::new(CpalMicrophone::new(config.input_device.clone()));

    let (controller, events) =
        CallController::new(backend, transport, microphone, context, config.call_settings());
    let controller = Arc::new(controller);
    let shutdown = CancellationToken::new();
    let runner = tokio::spawn({
        let controller = controller.clone();
        let shutdown = shutdown.clone();
        async move { controller.run(events, shutdown).await }
    });

    let mut updates = controller.subscribe();
    if let Err(e) = controller.start_call(Some(&project)).await {
        shutdown.cancel();
        runner.await.ok();
        anyhow::bail!("Could not start the call: {e}");
    }
    println!(
        "Calling the agent for \"{}\". Press Enter or q to end and save, x to discard, Ctrl-C to end.",
        project.title
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(CallUpdate::Transition { to: CallState::Idle, .. }) => {
                    // Every path back to Idle publishes its outcome right after the transition.
                    while let Ok(update) = updates.try_recv() {
                        if let CallUpdate::Finished { reason, outcome, .. } = update {
                            report_finished(&controller, reason, &outcome);
                        }
                    }
                    break;
                }
                Ok(CallUpdate::Transition { to, .. }) => println!("Call is {:?}.", to),
                Ok(CallUpdate::Finished { reason, outcome, .. }) => {
                    report_finished(&controller, reason, &outcome);
                    break;
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Missed {} call updates", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            line = lines.next_line(), if stdin_open => {
                let Some(command) = line? else {
                    stdin_open = false;
                    continue;
                };
                match CallCommand::parse(&command) {
                    CallCommand::End => end_in_background(&controller),
                    CallCommand::Discard => {
                        println!("Discard this session without saving? [y/N]");
                        let answer = lines.next_line().await?.unwrap_or_default();
                        let confirmed = answer.trim().eq_ignore_ascii_case("y");
                        if let Err(e) = controller.force_close(confirmed).await {
                            println!("{}", e);
                        }
                    }
                    CallCommand::Unknown(other) => println!("Unknown command {:?}.", other),
                }
            }
            _ = tokio::signal::ctrl_c() => end_in_background(&controller),
        }
    }

    shutdown.cancel();
    runner.await.ok();
    drop(input_stream);
    drop(output_stream);
    playback.abort();
    Ok(())
}
