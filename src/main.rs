use std::io::{self, BufRead};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use colored::*;
use tracing::{info, warn};

use rusty_expressions::args::Args;
use rusty_expressions::camera::{self, CameraSource};
use rusty_expressions::commands::{self, Command, ControlReply};
use rusty_expressions::config::AppConfig;
use rusty_expressions::logging;
use rusty_expressions::mesh::FaceMeshModel;
use rusty_expressions::model::DecisionTreeTrainer;
use rusty_expressions::output::{self, MjpegWriter, WindowOutput, MULTIPART_CONTENT_TYPE};
use rusty_expressions::overlay::FramePainter;
use rusty_expressions::pipeline::{self, FramePipeline, PipelineExit, PipelineOptions};
use rusty_expressions::store::ArtifactStore;
use rusty_expressions::studio::{Studio, StudioSettings};
use rusty_expressions::types::MESH_POINTS;

const FRAME_WAIT: Duration = Duration::from_millis(50);

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(&args.log_level)?;

    if args.list {
        return camera::list_cameras();
    }

    // 0. Config
    let mut config = AppConfig::load(&args.config)?;
    args.apply(&mut config);

    // 1. Shared state
    let store = ArtifactStore::new(
        &config.storage.data_dir,
        &config.storage.dataset_file,
        &config.storage.model_file,
    )?;
    let studio = Arc::new(Studio::new(
        store,
        Box::new(DecisionTreeTrainer::new(config.training.tree_params())),
        StudioSettings {
            points: MESH_POINTS,
            split: config.training.split(),
            stall_timeout: config.capture.stall_timeout(),
        },
    ));
    if studio.store().has_dataset() {
        info!(
            "Found a saved dataset at {}; 'load data' brings it back into memory",
            studio.store().dataset_path().display()
        );
    }

    // 2. Frame pipeline: camera and models are opened on the pipeline thread
    let (sink, frames) = output::frame_channel();
    let pipeline_config = config.clone();
    let handle = pipeline::spawn(Arc::clone(&studio), move |studio| {
        let cfg = pipeline_config;
        let camera = CameraSource::new(cfg.camera.index, cfg.camera.width, cfg.camera.height)?;
        let mesh = FaceMeshModel::new(
            &cfg.models.face_mesh,
            &cfg.models.face_detection,
            cfg.models.detection_threshold,
        )?;
        let painter = FramePainter::new(
            cfg.ui.show_mesh,
            &cfg.ui.mesh_color_hex,
            cfg.ui.mesh_dot_size,
            &cfg.ui.font_family,
            cfg.ui.font_size_pt,
        );
        let options = PipelineOptions {
            mirror: cfg.camera.mirror,
            jpeg_quality: cfg.ui.jpeg_quality,
        };
        Ok(FramePipeline::new(studio, camera, mesh, painter, sink, options))
    })?;

    // 3. Operator console
    let quit = Arc::new(AtomicBool::new(false));
    spawn_console(Arc::clone(&studio), Arc::clone(&quit))?;
    println!("{}", "Type 'help' for commands.".cyan());

    // 4. Outputs
    let mut window = if config.ui.show_window {
        Some(WindowOutput::new(
            "Rusty Expressions",
            config.camera.width.max(1) as usize,
            config.camera.height.max(1) as usize,
        )?)
    } else {
        None
    };
    let mut mjpeg = match &args.mjpeg {
        Some(path) => {
            info!("Writing {} stream to {}", MULTIPART_CONTENT_TYPE, path.display());
            Some(MjpegWriter::create(path)?)
        }
        None => None,
    };

    // 5. Loop
    while !quit.load(Ordering::Relaxed) {
        if let Some(win) = &window {
            if !win.is_open() || win.is_key_down(minifb::Key::Escape) {
                break;
            }
        }

        match frames.next_frame(FRAME_WAIT) {
            Ok(Some(frame)) => {
                if let Some(win) = window.as_mut() {
                    if let Err(e) = win.show(&frame) {
                        warn!("Dropping preview frame: {:#}", e);
                    }
                }
                if let Some(writer) = mjpeg.as_mut() {
                    writer.write_frame(&frame)?;
                }
            }
            Ok(None) => {
                if let Some(win) = window.as_mut() {
                    win.pump();
                }
            }
            Err(_) => break,
        }
    }

    let exit = handle.stop();
    if let Some(writer) = mjpeg {
        let frames = writer.frames();
        writer.into_inner()?;
        info!(frames, "MJPEG stream closed");
    }
    match exit {
        PipelineExit::Stopped => println!("{}", "Stopped.".green()),
        PipelineExit::Failed(reason) => println!("{}", format!("Pipeline failed: {}", reason).red()),
    }
    Ok(())
}

fn spawn_console(studio: Arc<Studio>, quit: Arc<AtomicBool>) -> io::Result<()> {
    thread::Builder::new().name("console".to_string()).spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let command = match commands::parse(&line) {
                Ok(Some(command)) => command,
                Ok(None) => continue,
                Err(e) => {
                    print_reply(&ControlReply::failed(&e));
                    continue;
                }
            };

            if command == Command::Quit {
                quit.store(true, Ordering::Relaxed);
                break;
            }
            if command.is_blocking() {
                // keep the console free for 'abort' and 'status' while capturing
                let studio = Arc::clone(&studio);
                let spawned = thread::Builder::new()
                    .name("capture".to_string())
                    .spawn(move || print_reply(&commands::execute(&studio, &command)));
                if let Err(e) = spawned {
                    warn!("Failed to start capture worker: {}", e);
                }
                continue;
            }
            print_reply(&commands::execute(&studio, &command));
        }
    })?;
    Ok(())
}

fn print_reply(reply: &ControlReply) {
    if reply.success {
        println!("{}", reply.message.green());
    } else {
        println!("{}", reply.message.red());
    }
    if let Some(accuracy) = reply.accuracy {
        println!("{}", format!("Accuracy: {:.2}%", accuracy * 100.0).yellow());
    }
}
