//! CLI surface (spec §6): `channel {add,delete,list,crawl,unblock,show}`,
//! `video {delete,list}`, `run`, `quit`. Exit codes: `0` success, `1` user
//! error, `2` runtime error — the same three-way split spec §6 documents.
//! Argument parsing follows the teacher's own `clap::Parser` derive style
//! (`numbleroot-autotube/src/main.rs`'s `Args`), extended to subcommands.

use crate::block::BlockRegistry;
use crate::config::{MetarrArgs, ProgramConfig, Settings};
use crate::crawler;
use crate::runtime::Runtime;
use crate::scheduler::Scheduler;
use crate::scraper::HttpScraper;
use crate::store::{NewChannelUrl, Store};
use crate::tracker::DownloadTracker;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) const EXIT_SUCCESS: i32 = 0;
pub(crate) const EXIT_USER_ERROR: i32 = 1;
pub(crate) const EXIT_RUNTIME_ERROR: i32 = 2;

#[derive(Debug, Parser)]
#[command(about, author, version, next_line_help = true)]
pub(crate) struct Cli {
    #[arg(long, env, default_value = "tubarr.db")]
    /// Path to the SQLite database file.
    pub(crate) database: String,

    #[arg(long, env)]
    /// Path to a TOML config file (spec §6); omit to run with defaults.
    pub(crate) config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Manage followed channels.
    Channel {
        #[command(subcommand)]
        action: ChannelCommand,
    },
    /// Manage individually tracked videos.
    Video {
        #[command(subcommand)]
        action: VideoCommand,
    },
    /// Run the scheduler until signalled to stop.
    Run,
    /// Ask a running instance to shut down (SPEC_FULL.md §C).
    Quit,
}

#[derive(Debug, Subcommand)]
pub(crate) enum ChannelCommand {
    /// Register a channel and its channel URLs.
    Add {
        name: String,
        #[arg(long = "url", required = true)]
        urls: Vec<String>,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        login_url: Option<String>,
    },
    /// Remove a channel and every video/channel-URL row it owns.
    Delete { name: String },
    /// List every followed channel.
    List,
    /// Run one crawl cycle for a channel immediately, outside the scheduler.
    Crawl { name: String },
    /// Lift a bot-block on a hostname, in every auth context.
    Unblock { domain: String },
    /// Show one channel's settings, URLs, and recent status.
    Show { name: String },
}

#[derive(Debug, Subcommand)]
pub(crate) enum VideoCommand {
    /// Delete one or more tracked videos (and their files on disk) by URL.
    Delete {
        channel: String,
        #[arg(long = "url", required = true)]
        urls: Vec<String>,
    },
    /// List every video tracked for a channel.
    List { channel: String },
}

fn load_config(cli: &Cli) -> Result<ProgramConfig, i32> {
    match &cli.config {
        Some(path) => ProgramConfig::load(path).map_err(|e| {
            eprintln!("failed to load config at {}: {e}", path.display());
            EXIT_USER_ERROR
        }),
        None => Ok(ProgramConfig::default()),
    }
}

pub(crate) async fn execute(cli: Cli) -> i32 {
    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let store = match Store::open(&cli.database).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to open database '{}': {e}", cli.database);
            return EXIT_RUNTIME_ERROR;
        }
    };

    match cli.command {
        Command::Channel { action } => channel_command(&store, action).await,
        Command::Video { action } => video_command(&store, action).await,
        Command::Run => run_scheduler(store, &config).await,
        Command::Quit => quit_command(&store).await,
    }
}

async fn fresh_block_registry(store: &Store) -> Result<BlockRegistry, i32> {
    let blocks = BlockRegistry::new(store.clone(), HashMap::new());
    if let Err(e) = blocks.load_all().await {
        eprintln!("failed to load blocked domains: {e}");
        return Err(EXIT_RUNTIME_ERROR);
    }
    Ok(blocks)
}

async fn channel_command(store: &Store, action: ChannelCommand) -> i32 {
    match action {
        ChannelCommand::Add {
            name,
            urls,
            username,
            password,
            login_url,
        } => {
            let new_urls: Vec<NewChannelUrl> = urls
                .into_iter()
                .map(|url| NewChannelUrl {
                    url,
                    username: username.clone(),
                    password: password.clone(),
                    login_url: login_url.clone(),
                    is_manual: false,
                })
                .collect();
            match store
                .add_channel(&name, &Settings::default(), &MetarrArgs::default(), &new_urls)
                .await
            {
                Ok(channel) => {
                    println!("added channel '{}' (id {})", channel.name, channel.id);
                    EXIT_SUCCESS
                }
                Err(e) => {
                    eprintln!("{e}");
                    EXIT_USER_ERROR
                }
            }
        }
        ChannelCommand::Delete { name } => match store.delete_channel(&name).await {
            Ok(true) => {
                println!("deleted channel '{name}'");
                EXIT_SUCCESS
            }
            Ok(false) => {
                eprintln!("no such channel '{name}'");
                EXIT_USER_ERROR
            }
            Err(e) => {
                eprintln!("{e}");
                EXIT_RUNTIME_ERROR
            }
        },
        ChannelCommand::List => match store.list_channels().await {
            Ok(channels) => {
                for c in channels {
                    println!(
                        "{}\tlast_scan={}\tpaused={}\tbot_blocked={}",
                        c.name,
                        c.last_scan.map_or_else(|| "never".to_string(), |t| t.to_rfc3339()),
                        c.settings.paused,
                        c.bot_blocked,
                    );
                }
                EXIT_SUCCESS
            }
            Err(e) => {
                eprintln!("{e}");
                EXIT_RUNTIME_ERROR
            }
        },
        ChannelCommand::Crawl { name } => crawl_once(store, &name).await,
        ChannelCommand::Unblock { domain } => {
            let blocks = match fresh_block_registry(store).await {
                Ok(b) => b,
                Err(code) => return code,
            };
            match blocks.unblock(&domain, None).await {
                Ok(()) => {
                    println!("unblocked '{domain}'");
                    EXIT_SUCCESS
                }
                Err(e) => {
                    eprintln!("{e}");
                    EXIT_RUNTIME_ERROR
                }
            }
        }
        ChannelCommand::Show { name } => show_channel(store, &name).await,
    }
}

async fn crawl_once(store: &Store, name: &str) -> i32 {
    let channel = match store.get_channel_by_name(name).await {
        Ok(Some(c)) => c,
        Ok(None) => {
            eprintln!("no such channel '{name}'");
            return EXIT_USER_ERROR;
        }
        Err(e) => {
            eprintln!("{e}");
            return EXIT_RUNTIME_ERROR;
        }
    };

    let blocks = match fresh_block_registry(store).await {
        Ok(b) => b,
        Err(code) => return code,
    };
    let tracker = DownloadTracker::new(store.clone());
    let runtime = Arc::new(Runtime::new(store.clone(), blocks, tracker));

    let flush_cancel = tokio_util::sync::CancellationToken::new();
    let flusher = runtime.tracker.start(flush_cancel.clone());

    let scraper = HttpScraper::new();
    let summary = crawler::crawl_channel(&runtime, &scraper, &channel).await;

    flush_cancel.cancel();
    let _ = flusher.await;

    println!(
        "crawl finished: discovered={} completed={} ignored={} failed={} bot_blocked={} urls_skipped_blocked={}",
        summary.discovered,
        summary.completed,
        summary.ignored,
        summary.failed,
        summary.bot_blocked,
        summary.urls_skipped_blocked,
    );
    EXIT_SUCCESS
}

async fn show_channel(store: &Store, name: &str) -> i32 {
    let channel = match store.get_channel_by_name(name).await {
        Ok(Some(c)) => c,
        Ok(None) => {
            eprintln!("no such channel '{name}'");
            return EXIT_USER_ERROR;
        }
        Err(e) => {
            eprintln!("{e}");
            return EXIT_RUNTIME_ERROR;
        }
    };
    let urls = match store.list_channel_urls(channel.id).await {
        Ok(u) => u,
        Err(e) => {
            eprintln!("{e}");
            return EXIT_RUNTIME_ERROR;
        }
    };

    println!("channel '{}' (id {})", channel.name, channel.id);
    println!("  paused: {}", channel.settings.paused);
    println!("  bot_blocked: {}", channel.bot_blocked);
    println!("  crawl_freq_minutes: {}", channel.crawl_freq_minutes);
    println!(
        "  last_scan: {}",
        channel.last_scan.map_or_else(|| "never".to_string(), |t| t.to_rfc3339())
    );
    println!("  new_video_urls: {}", channel.new_video_urls.len());
    println!("  channel URLs:");
    for u in urls {
        println!("    - {} (manual={})", u.url, u.is_manual);
    }
    EXIT_SUCCESS
}

async fn video_command(store: &Store, action: VideoCommand) -> i32 {
    match action {
        VideoCommand::Delete { channel, urls } => {
            let Some(chan) = (match store.get_channel_by_name(&channel).await {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("{e}");
                    return EXIT_RUNTIME_ERROR;
                }
            }) else {
                eprintln!("no such channel '{channel}'");
                return EXIT_USER_ERROR;
            };
            match store.delete_videos_by_urls(chan.id, &urls).await {
                Ok(n) => {
                    if let Err(e) = store.remove_new_video_urls(chan.id, &urls).await {
                        tracing::warn!(error = %e, channel = %channel, "failed to prune new_video_urls list");
                    }
                    println!("deleted {n} video(s)");
                    EXIT_SUCCESS
                }
                Err(e) => {
                    eprintln!("{e}");
                    EXIT_RUNTIME_ERROR
                }
            }
        }
        VideoCommand::List { channel } => {
            let Some(chan) = (match store.get_channel_by_name(&channel).await {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("{e}");
                    return EXIT_RUNTIME_ERROR;
                }
            }) else {
                eprintln!("no such channel '{channel}'");
                return EXIT_USER_ERROR;
            };
            match store.list_videos_by_channel(chan.id).await {
                Ok(videos) => {
                    for v in videos {
                        println!(
                            "{}\tfinished={}\tignored={}\tpath={}",
                            v.url,
                            v.finished,
                            v.ignored,
                            v.video_path.as_deref().unwrap_or("-"),
                        );
                    }
                    EXIT_SUCCESS
                }
                Err(e) => {
                    eprintln!("{e}");
                    EXIT_RUNTIME_ERROR
                }
            }
        }
    }
}

async fn run_scheduler(store: Store, config: &ProgramConfig) -> i32 {
    let blocks = match fresh_block_registry(&store).await {
        Ok(b) => b,
        Err(code) => return code,
    };
    if let Err(e) = blocks.clean_expired().await {
        tracing::warn!(error = %e, "failed to clean expired bot-blocks at startup");
    }

    let tracker = DownloadTracker::new(store.clone());
    let runtime = Arc::new(Runtime::new(store, blocks, tracker));

    let signal_cancel = runtime.cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received signal to shut down gracefully");
        signal_cancel.cancel();
    });

    let flusher_handle = runtime.tracker.start(runtime.cancel.clone());
    let scheduler = Scheduler::new(Arc::clone(&runtime), Arc::new(HttpScraper::new()), config);

    let result = scheduler.run().await;

    runtime.cancel.cancel();
    runtime.tracker.stop().await;
    let _ = flusher_handle.await;
    runtime.store.close().await;

    match result {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            EXIT_RUNTIME_ERROR
        }
    }
}

async fn quit_command(store: &Store) -> i32 {
    match store.get_program_singleton().await {
        Ok(s) if !s.running => {
            eprintln!("no instance is currently running");
            EXIT_USER_ERROR
        }
        Ok(_) => match store.request_shutdown().await {
            Ok(()) => {
                println!("shutdown requested at {}", Utc::now().to_rfc3339());
                EXIT_SUCCESS
            }
            Err(e) => {
                eprintln!("{e}");
                EXIT_RUNTIME_ERROR
            }
        },
        Err(e) => {
            eprintln!("{e}");
            EXIT_RUNTIME_ERROR
        }
    }
}
