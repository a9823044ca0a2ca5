// Copyright 2025 jonefeewang@gmail.com
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


use std::path::PathBuf;

use clap::Parser;
use dotenv::dotenv;
use imwire::network::LoggingStateObserver;
use imwire::service::setup_tracing;
use imwire::{AppResult, ClientConfig, CloseReason, NetworkHandler, StateKind};
use tokio::runtime;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Parser)]
#[command(version)]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    /// directory for the rolling log files
    #[arg(long, default_value = "./logs")]
    pub log_dir: PathBuf,
    #[command(subcommand)]
    pub command: Option<Command>,
    /// log level (v: info, vv: debug, vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Parser)]
pub enum Command {
    PrintConfig,
    /// connect and print every decoded notice until Ctrl-C
    Connect {
        /// account the client is logged in as
        #[arg(long)]
        uin: Option<u64>,
    },
}

fn main() -> AppResult<()> {
    // 加载 .env 文件
    dotenv().ok();

    let commandline: CommandLine = CommandLine::parse();
    let _log_guard = setup_tracing(&commandline.log_dir, commandline.verbose)?;

    let config_path = commandline.conf.as_ref().map_or_else(
        || {
            let mut path = PathBuf::from("./");
            path.push("conf.toml");
            path
        },
        PathBuf::from,
    );
    let config = ClientConfig::set_up_config(config_path)?;

    match commandline.command {
        Some(Command::PrintConfig) => {
            println!("{:#?}", config);
            Ok(())
        }
        Some(Command::Connect { uin }) => {
            let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
            rt.block_on(run(config, uin))
        }
        None => {
            let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
            rt.block_on(run(config, None))
        }
    }
}

async fn run(config: ClientConfig, uin: Option<u64>) -> AppResult<()> {
    let mut builder = NetworkHandler::builder(config).observer(LoggingStateObserver);
    if let Some(uin) = uin {
        builder = builder.self_uin(uin);
    }
    let handler = builder.build()?;
    let mut events = handler.subscribe_events();
    let mut state = handler.subscribe_state();

    handler.connect().await?;
    info!("connected, waiting for notices");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => println!("{:?}", event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event subscriber lagged"),
                Err(RecvError::Closed) => break,
            },
            changed = state.changed() => {
                if changed.is_err() || *state.borrow() == StateKind::Closed {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c received, closing");
                handler.close(CloseReason::Graceful);
                break;
            }
        }
    }

    let snapshot = handler.state();
    info!(state = %snapshot.kind, reason = ?snapshot.close_reason, "client stopped");
    Ok(())
}
