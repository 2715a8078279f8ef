use clap::{Parser, Subcommand};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "reports_cli", version)]
struct Args {
    /// Core base URL, e.g. http://127.0.0.1:17700
    #[arg(long, default_value = "http://127.0.0.1:17700")]
    core_url: String,

    /// Session id to act as.
    #[arg(long, default_value_t = 1)]
    session: u64,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Open a session for a player or the console.
    Login {
        /// Display name of the session.
        name: String,

        /// Registered account id, if the session is logged in.
        #[arg(long)]
        account_id: Option<i64>,

        /// Granted capability; repeat for several (e.g. --cap 'reports.*').
        #[arg(long = "cap")]
        capabilities: Vec<String>,

        /// Mark the session as the server console.
        #[arg(long, default_value_t = false)]
        console: bool,

        /// Starting position as x:y.
        #[arg(long, default_value = "0:0")]
        position: String,
    },
    /// Close the session.
    Logout,
    /// Register a known account so /report can find it by name.
    Account { id: i64, name: String },
    /// Run a command line such as "/creports page 2". Arguments holding
    /// spaces are re-quoted so they reach the core as one word.
    Command { line: Vec<String> },
    /// Send a chat line through the phrase watcher.
    Chat { text: Vec<String> },
}

#[derive(Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct OkResponse<T> {
    ok: bool,
    #[serde(default)]
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct EffectsData {
    effects: Vec<Effect>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Effect {
    Message {
        session: u64,
        tone: String,
        text: String,
    },
    Teleport {
        session: u64,
        position: Pos,
    },
}

#[derive(Deserialize)]
struct Pos {
    x: f32,
    y: f32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reports_cli=warn".into()),
        )
        .init();

    let args = Args::parse();
    let base = args.core_url.trim_end_matches('/');
    let client = reqwest::Client::new();

    match args.action {
        Action::Login {
            name,
            account_id,
            capabilities,
            console,
            position,
        } => {
            let (x, y) = parse_position(&position)?;
            let account = account_id.map(|id| json!({ "id": id, "name": name }));
            let payload = json!({
                "session": args.session,
                "account": account,
                "name": name,
                "capabilities": capabilities,
                "console": console,
                "position": { "x": x, "y": y },
            });
            let data: EffectsData = post_ok(&client, &format!("{base}/sessions"), &payload).await?;
            print_effects(&data.effects);
        }
        Action::Logout => {
            let res = client
                .delete(format!("{base}/sessions/{}", args.session))
                .send()
                .await?;
            if !res.status().is_success() {
                anyhow::bail!("http_{}", res.status().as_u16());
            }
            println!("session {} closed", args.session);
        }
        Action::Account { id, name } => {
            let payload = json!({ "accounts": [{ "id": id, "name": name }] });
            let _: serde_json::Value =
                post_ok(&client, &format!("{base}/accounts"), &payload).await?;
            println!("account {id} registered as {name}");
        }
        Action::Command { line } => {
            let payload = json!({ "session": args.session, "line": join_command(&line) });
            let data: EffectsData = post_ok(&client, &format!("{base}/command"), &payload).await?;
            print_effects(&data.effects);
        }
        Action::Chat { text } => {
            let payload = json!({ "session": args.session, "text": text.join(" ") });
            let data: EffectsData = post_ok(&client, &format!("{base}/chat"), &payload).await?;
            print_effects(&data.effects);
        }
    }
    Ok(())
}

async fn post_ok<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    payload: &serde_json::Value,
) -> anyhow::Result<T> {
    debug!("POST {url} {payload}");
    let res = client.post(url).json(payload).send().await?;
    let status = res.status();
    let body: OkResponse<T> = res.json().await?;
    if !status.is_success() || !body.ok {
        anyhow::bail!(
            "http_{}: {}",
            status.as_u16(),
            body.error.as_deref().unwrap_or("not_ok")
        );
    }
    body.data.ok_or_else(|| anyhow::anyhow!("missing_data"))
}

fn parse_position(raw: &str) -> anyhow::Result<(f32, f32)> {
    let (x, y) = raw
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("invalid --position '{raw}'. Use x:y"))?;
    Ok((x.trim().parse()?, y.trim().parse()?))
}

/// Joins shell arguments back into a line the core splits the same way. Words
/// that are empty or hold whitespace, `"` or `\` are quoted and escaped.
fn join_command(words: &[String]) -> String {
    let needs_quotes = |word: &str| {
        word.is_empty()
            || word
                .chars()
                .any(|c| c.is_whitespace() || c == '"' || c == '\\')
    };
    words
        .iter()
        .map(|word| {
            if !needs_quotes(word) {
                return word.clone();
            }
            let mut quoted = String::with_capacity(word.len() + 2);
            quoted.push('"');
            for c in word.chars() {
                if c == '"' || c == '\\' {
                    quoted.push('\\');
                }
                quoted.push(c);
            }
            quoted.push('"');
            quoted
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn print_effects(effects: &[Effect]) {
    for effect in effects {
        match effect {
            Effect::Message { session, tone, text } => {
                println!("[{session}] ({tone}) {text}");
            }
            Effect::Teleport { session, position } => {
                println!("[{session}] teleport to ({},{})", position.x, position.y);
            }
        }
    }
}
