// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use livelink_recorder::codec::{read_layout, BlockHeader};
use livelink_recorder::config::load_config_with_env;
use livelink_recorder::playback::PlaybackTrackSet;
use livelink_recorder::storage::{open_recording, StoreFactory};
use livelink_recorder::types::STATIC_TRACK_SUFFIX;
use livelink_recorder::TypeRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// LiveLink Recorder - inspect and stream saved LiveLink recordings
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List saved packages
    List,

    /// Print a package's manifest and block layout
    Inspect {
        /// Package name, relative to the storage base path
        package: String,
    },

    /// Stream a window of frames and print them
    Dump {
        package: String,

        /// Only print this subject
        #[arg(short, long)]
        subject: Option<String>,

        /// First frame to print
        #[arg(long, default_value_t = 0)]
        from: i32,

        /// Number of frames to print
        #[arg(long, default_value_t = 10)]
        count: i32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let recorder_config = load_config_with_env(&args.config)?;

    // Initialize tracing with configured level
    let log_level = match recorder_config.logging.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Loaded configuration from: {:?}", args.config);
    info!("Storage backend: {}", recorder_config.storage.backend);

    let store = StoreFactory::create(&recorder_config.storage)?;
    store.initialize().await?;

    // Payload types are opaque to this tool.
    let registry = Arc::new(TypeRegistry::permissive());

    match args.command {
        Command::List => {
            for name in store.list_packages().await? {
                println!("{}", name);
            }
        }

        Command::Inspect { package } => {
            let stored = store.load_package(&package).await?;
            println!("{}", serde_json::to_string_pretty(&stored.manifest)?);

            let mut bulk = stored.bulk;
            let layout = read_layout(&mut bulk, &registry)
                .with_context(|| format!("Failed to read layout of '{}'", package))?;
            println!("format version: {}", layout.version);
            println!("static blocks:");
            for block in &layout.static_blocks {
                print_block(block);
            }
            println!("frame blocks:");
            for block in &layout.frame_blocks {
                print_block(block);
            }
        }

        Command::Dump {
            package,
            subject,
            from,
            count,
        } => {
            let recording = Arc::new(
                open_recording(
                    store.as_ref(),
                    &package,
                    Arc::clone(&registry),
                    recorder_config.streaming.clone(),
                )
                .await?,
            );

            let count = count.max(1);
            let streamed = Arc::clone(&recording);
            let tracks = tokio::task::spawn_blocking(move || -> Result<PlaybackTrackSet> {
                streamed.load_recording_data(from, count)?;
                streamed.wait_for_buffered_frames(from, from + count - 1);
                let mut tracks = PlaybackTrackSet::new();
                streamed.copy_recording_data(&mut tracks);
                streamed.unload_recording_data()?;
                Ok(tracks)
            })
            .await??;

            for (key, track) in tracks.iter() {
                if key.name.ends_with(STATIC_TRACK_SUFFIX) {
                    continue;
                }
                if subject.as_deref().is_some_and(|name| name != key.name) {
                    continue;
                }
                let mut track = track.clone();
                println!("{}:", key);
                let window_end = track.start_index_offset() + track.max_frames() as i32;
                for index in from.max(track.start_index_offset())..(from + count).min(window_end) {
                    let timestamp = track.frame_index_to_playhead(index);
                    if let Some(frame) = track.try_get_frame(index) {
                        println!(
                            "  frame {:>6}  t={:>10.4}  {} bytes ({})",
                            frame.frame_index,
                            timestamp.unwrap_or_default(),
                            frame.data.len(),
                            frame.data.type_name()
                        );
                    }
                }
            }
        }
    }

    Ok(())
}

fn print_block(block: &BlockHeader) {
    println!(
        "  {:<32} frames={:<6} type={:<24} record={} bytes",
        block.subject_key.to_string(),
        block.frame_count,
        block.type_name,
        block.disk_record_size
    );
}
