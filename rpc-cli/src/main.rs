//! EngineLink Command Line Interface
//!
//! Sends one command to a running engine over its control channel.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

#[derive(Parser)]
#[command(name = "enginelink")]
#[command(about = "EngineLink Command Line Interface", long_about = None)]
#[command(after_help = r#"EXAMPLES:
    enginelink ping                               Check the engine is reachable
    enginelink spawn Cube --at 0,0,100            Spawn a cube
    enginelink spawn PointLight --label KeyLight  Spawn a named light
    enginelink scene                              List actors
    enginelink move Cube_1 --z 250 --yaw 90       Move and rotate an actor
    enginelink delete Cube_1                      Destroy an actor
    enginelink import /tmp/brick.png T_Brick      Import a texture
    enginelink material Cube_1 /Game/Generated/T_Brick
    enginelink save                               Save all dirty assets
    enginelink events --since 10                  Read the event journal
    enginelink raw get_actor '{"actor_id":"Cube_1"}'
"#)]
struct Cli {
    /// Engine host
    #[arg(long, global = true, default_value = "127.0.0.1")]
    host: String,

    /// Engine control port
    #[arg(short, long, global = true, default_value_t = 9000)]
    port: u16,

    /// Seconds to wait for a response
    #[arg(long, global = true, default_value_t = 30)]
    timeout: u64,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the connection
    Ping,

    /// List commands supported by the engine
    Capabilities,

    /// Spawn an actor
    Spawn {
        /// Actor class (e.g. Cube, Sphere, PointLight, CameraActor)
        class: String,

        /// Location as x,y,z
        #[arg(long, value_delimiter = ',', num_args = 3, allow_negative_numbers = true)]
        at: Option<Vec<f64>>,

        /// Rotation as pitch,yaw,roll in degrees
        #[arg(long, value_delimiter = ',', num_args = 3, allow_negative_numbers = true)]
        rotation: Option<Vec<f64>>,

        /// Scale as x,y,z
        #[arg(long, value_delimiter = ',', num_args = 3)]
        scale: Option<Vec<f64>>,

        /// Actor label
        #[arg(short, long)]
        label: Option<String>,
    },

    /// List actors in the world
    Scene,

    /// Describe an actor
    Actor {
        /// Actor id
        id: String,
    },

    /// Destroy an actor
    Delete {
        /// Actor id
        id: String,
    },

    /// Change an actor's transform; unset components are kept
    Move {
        /// Actor id
        id: String,

        #[arg(long, allow_negative_numbers = true)]
        x: Option<f64>,
        #[arg(long, allow_negative_numbers = true)]
        y: Option<f64>,
        #[arg(long, allow_negative_numbers = true)]
        z: Option<f64>,
        #[arg(long, allow_negative_numbers = true)]
        pitch: Option<f64>,
        #[arg(long, allow_negative_numbers = true)]
        yaw: Option<f64>,
        #[arg(long, allow_negative_numbers = true)]
        roll: Option<f64>,
        #[arg(long)]
        scale_x: Option<f64>,
        #[arg(long)]
        scale_y: Option<f64>,
        #[arg(long)]
        scale_z: Option<f64>,
    },

    /// Import a file as an asset
    Import {
        /// Source file on the engine's filesystem
        file: PathBuf,

        /// Asset name under /Game/Generated
        name: String,
    },

    /// List assets
    Assets {
        /// Only assets whose path starts with this
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Create a material from a texture and apply it to an actor
    Material {
        /// Actor id
        actor: String,

        /// Texture asset path
        texture: String,
    },

    /// Save all dirty assets
    Save,

    /// Add an actor to the editor selection
    Select {
        /// Actor id
        id: String,
    },

    /// Clear the editor selection
    ClearSelection,

    /// Read engine events
    Events {
        /// First event sequence number to return
        #[arg(long, default_value_t = 0)]
        since: u64,

        /// Maximum number of events
        #[arg(long)]
        limit: Option<u64>,
    },

    /// Send a raw command
    Raw {
        /// Command name
        command: String,

        /// JSON arguments
        args: Option<String>,
    },
}

#[derive(Serialize)]
struct Request<'a> {
    id: String,
    command: &'a str,
    args: Value,
}

#[derive(Deserialize)]
struct Response {
    id: Option<String>,
    status: String,
    result: Option<Value>,
    detail: Option<String>,
}

/// Builds an argument object, leaving out unset values
fn sparse_args<const N: usize>(fields: [(&str, Option<Value>); N]) -> Value {
    Value::Object(
        fields
            .into_iter()
            .filter_map(|(k, v)| Some((k.to_string(), v?)))
            .collect::<Map<_, _>>(),
    )
}

fn parse_response(line: &str, request_id: &str) -> Result<Value> {
    if line.is_empty() {
        bail!("Connection closed before a response was received");
    }
    let response: Response = serde_json::from_str(line).context("Failed to parse response")?;

    if response.status != "ok" {
        bail!(
            "Engine error: {}",
            response.detail.as_deref().unwrap_or("unknown error")
        );
    }
    if response.id.as_deref() != Some(request_id) {
        bail!("Response id does not match request");
    }

    response
        .result
        .ok_or_else(|| anyhow!("No result in response"))
}

/// Connect to the engine, send one request and wait for its response
fn rpc_call(cli: &Cli, command: &str, args: Value) -> Result<Value> {
    let addr = format!("{}:{}", cli.host, cli.port);
    let mut stream =
        TcpStream::connect(&addr).with_context(|| format!("Failed to connect to: {}", addr))?;
    stream.set_read_timeout(Some(Duration::from_secs(cli.timeout)))?;

    let request_id = std::process::id().to_string();
    let request = Request {
        id: request_id.clone(),
        command,
        args,
    };
    let mut frame = serde_json::to_vec(&request)?;
    frame.push(b'\n');
    stream.write_all(&frame)?;
    stream.flush()?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .context("Failed to read response")?;

    parse_response(line.trim_end(), &request_id)
}

fn print_actor(actor: &Value) {
    let t = &actor["transform"];
    println!(
        "{:<24} {:<18} loc ({}, {}, {}) rot ({}, {}, {}) scale ({}, {}, {}){}",
        actor["actor_id"].as_str().unwrap_or("?"),
        actor["class"].as_str().unwrap_or("?"),
        t["location"]["x"],
        t["location"]["y"],
        t["location"]["z"],
        t["rotation"]["pitch"],
        t["rotation"]["yaw"],
        t["rotation"]["roll"],
        t["scale"]["x"],
        t["scale"]["y"],
        t["scale"]["z"],
        actor["material"]
            .as_str()
            .map(|m| format!(" material {}", m))
            .unwrap_or_default(),
    );
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (command, call_args) = match &cli.command {
        Commands::Ping => ("ping", json!({})),
        Commands::Capabilities => ("capabilities", json!({})),
        Commands::Spawn {
            class,
            at,
            rotation,
            scale,
            label,
        } => (
            "spawn_actor",
            sparse_args([
                ("class", Some(json!(class))),
                ("location", at.as_ref().map(|v| json!(v))),
                ("rotation", rotation.as_ref().map(|v| json!(v))),
                ("scale", scale.as_ref().map(|v| json!(v))),
                ("label", label.as_ref().map(|v| json!(v))),
            ]),
        ),
        Commands::Scene => ("get_scene_info", json!({})),
        Commands::Actor { id } => ("get_actor", json!({"actor_id": id})),
        Commands::Delete { id } => ("delete_actor", json!({"actor_id": id})),
        Commands::Move {
            id,
            x,
            y,
            z,
            pitch,
            yaw,
            roll,
            scale_x,
            scale_y,
            scale_z,
        } => (
            "set_transform",
            sparse_args([
                ("actor_id", Some(json!(id))),
                ("x", x.map(|v| json!(v))),
                ("y", y.map(|v| json!(v))),
                ("z", z.map(|v| json!(v))),
                ("pitch", pitch.map(|v| json!(v))),
                ("yaw", yaw.map(|v| json!(v))),
                ("roll", roll.map(|v| json!(v))),
                ("scale_x", scale_x.map(|v| json!(v))),
                ("scale_y", scale_y.map(|v| json!(v))),
                ("scale_z", scale_z.map(|v| json!(v))),
            ]),
        ),
        Commands::Import { file, name } => (
            "import_asset",
            json!({"file_path": file, "asset_name": name}),
        ),
        Commands::Assets { prefix } => (
            "list_assets",
            sparse_args([("path_prefix", prefix.as_ref().map(|p| json!(p)))]),
        ),
        Commands::Material { actor, texture } => (
            "apply_material",
            json!({"actor_id": actor, "texture_asset_path": texture}),
        ),
        Commands::Save => ("invoke_editor_action", json!({"action": "save_all"})),
        Commands::Select { id } => (
            "invoke_editor_action",
            json!({"action": "select_actor", "actor_id": id}),
        ),
        Commands::ClearSelection => ("invoke_editor_action", json!({"action": "clear_selection"})),
        Commands::Events { since, limit } => (
            "get_events",
            sparse_args([
                ("since", Some(json!(since))),
                ("limit", limit.map(|l| json!(l))),
            ]),
        ),
        Commands::Raw { command, args } => {
            let args = if let Some(a) = args {
                serde_json::from_str(a).context("Invalid JSON args")?
            } else {
                json!({})
            };
            (command.as_str(), args)
        }
    };

    let result = rpc_call(&cli, command, call_args)?;

    if cli.json || matches!(cli.command, Commands::Raw { .. }) {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    match &cli.command {
        Commands::Ping => {
            println!(
                "Engine reachable (protocol {}, server {})",
                result["protocol_version"],
                result["server_version"].as_str().unwrap_or("?")
            );
        }
        Commands::Capabilities => {
            println!("Protocol version: {}", result["protocol_version"]);
            for cmd in result["commands"].as_array().into_iter().flatten() {
                let args: Vec<String> = cmd["args"]
                    .as_array()
                    .into_iter()
                    .flatten()
                    .map(|a| {
                        let name = a["name"].as_str().unwrap_or("?");
                        if a["required"].as_bool() == Some(true) {
                            format!("{}:{}", name, a["type"].as_str().unwrap_or("?"))
                        } else {
                            format!("[{}:{}]", name, a["type"].as_str().unwrap_or("?"))
                        }
                    })
                    .collect();
                println!(
                    "  {:<22} {:<12} {}",
                    cmd["name"].as_str().unwrap_or("?"),
                    cmd["context"].as_str().unwrap_or("?"),
                    args.join(" ")
                );
            }
        }
        Commands::Spawn { .. } | Commands::Actor { .. } => print_actor(&result),
        Commands::Scene => {
            let actors = result["actors"].as_array().map_or(&[][..], |a| a.as_slice());
            println!("Tick {}, {} actor(s)", result["tick"], actors.len());
            for actor in actors {
                print_actor(actor);
            }
        }
        Commands::Delete { .. } => {
            println!("Deleted {}", result["actor_id"].as_str().unwrap_or("?"));
        }
        Commands::Move { .. } => {
            print_actor(&json!({
                "actor_id": result["actor_id"],
                "class": "",
                "transform": result["transform"],
            }));
        }
        Commands::Import { .. } => {
            println!(
                "Imported {} ({})",
                result["asset_path"].as_str().unwrap_or("?"),
                result["kind"].as_str().unwrap_or("?")
            );
        }
        Commands::Assets { .. } => {
            for asset in result["assets"].as_array().into_iter().flatten() {
                println!(
                    "{:<48} {:<12}{}",
                    asset["path"].as_str().unwrap_or("?"),
                    asset["kind"].as_str().unwrap_or("?"),
                    if asset["dirty"].as_bool() == Some(true) {
                        " (unsaved)"
                    } else {
                        ""
                    }
                );
            }
        }
        Commands::Material { .. } => {
            println!(
                "Applied {} to {}",
                result["material_path"].as_str().unwrap_or("?"),
                result["actor_id"].as_str().unwrap_or("?")
            );
        }
        Commands::Save => println!("Saved {} asset(s)", result["saved"]),
        Commands::Select { .. } | Commands::ClearSelection => {
            let selection: Vec<&str> = result["selection"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(Value::as_str)
                .collect();
            println!("Selection: {}", selection.join(", "));
        }
        Commands::Events { .. } => {
            for ev in result["events"].as_array().into_iter().flatten() {
                let mut fields = ev.as_object().cloned().unwrap_or_default();
                let seq = fields.remove("seq").unwrap_or_default();
                let tick = fields.remove("tick").unwrap_or_default();
                let kind = fields.remove("kind").unwrap_or_default();
                println!(
                    "#{:<6} tick {:<8} {:<18} {}",
                    seq,
                    tick,
                    kind.as_str().unwrap_or("?"),
                    Value::Object(fields)
                );
            }
            println!("Next: {}", result["next"]);
        }
        Commands::Raw { .. } => unreachable!(),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_skip_unset() {
        let v = sparse_args([("a", Some(json!(1))), ("b", None), ("c", Some(json!("x")))]);
        assert_eq!(v, json!({"a": 1, "c": "x"}));
    }

    #[test]
    fn response_ok() {
        let v = parse_response(r#"{"id":"7","status":"ok","result":{"pong":true}}"#, "7").unwrap();
        assert_eq!(v["pong"], true);
    }

    #[test]
    fn response_error() {
        let err = parse_response(
            r#"{"id":"7","status":"error","detail":"unknown command"}"#,
            "7",
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Engine error: unknown command");
    }

    #[test]
    fn response_mismatch_and_eof() {
        assert!(parse_response(r#"{"id":"8","status":"ok","result":{}}"#, "7").is_err());
        assert!(parse_response("", "7").is_err());
    }

    #[test]
    fn cli_parses_vectors() {
        let cli = Cli::try_parse_from(["enginelink", "spawn", "Cube", "--at", "1,-2,3"]).unwrap();
        match cli.command {
            Commands::Spawn { at, .. } => assert_eq!(at, Some(vec![1.0, -2.0, 3.0])),
            _ => panic!("wrong command"),
        }
    }
}
