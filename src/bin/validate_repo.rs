//! Command-line client: validate a repository against a running server,
//! reopen an earlier conversation, and ask follow-up questions in it.

use clap::Parser;
use readme_rubric_validator::client::PollPolicy;
use readme_rubric_validator::llm::Role;
use readme_rubric_validator::{conversation_id_for, ValidatorClient};
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "validate_repo", about = "Check a repository README against the rubric")]
struct Args {
    /// Repository URL, e.g. https://github.com/owner/cf_ai_demo
    #[arg(required_unless_present = "conversation")]
    repository_url: Option<String>,

    /// Base URL of the validator server.
    #[arg(long, env = "VALIDATOR_SERVER", default_value = "http://127.0.0.1:8000")]
    server: String,

    /// Conversation id to store under; defaults to the repository name.
    #[arg(long)]
    conversation: Option<String>,

    /// Reopen the stored conversation instead of validating again.
    #[arg(long)]
    resume: bool,

    /// Model override; the server default otherwise.
    #[arg(long)]
    model: Option<String>,

    /// Follow-up questions asked after the validation, in order.
    #[arg(long = "ask")]
    ask: Vec<String>,

    /// Give up polling the README fetch after this many one-second attempts.
    #[arg(long, default_value_t = 30)]
    max_polls: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();
    let args = Args::parse();

    let mut client = ValidatorClient::new(&args.server)?.with_poll_policy(PollPolicy {
        interval: Duration::from_secs(1),
        max_attempts: args.max_polls,
    });
    if let Some(model) = &args.model {
        client = client.with_model(model);
    }

    let conversation = match (&args.conversation, &args.repository_url) {
        (Some(id), _) => id.clone(),
        (None, Some(url)) => conversation_id_for(url),
        (None, None) => anyhow::bail!("a repository URL or --conversation is required"),
    };

    if args.resume {
        let resumed = client.resume(&conversation).await?;
        match &resumed.report {
            Some(report) => println!("{}", report.render()),
            None => println!("(no validation results stored)"),
        }
        for turn in &resumed.turns {
            let who = if turn.role == Role::User { ">" } else { "<" };
            println!("{who} {}", turn.content);
        }
    } else {
        let Some(url) = args.repository_url.as_deref() else {
            anyhow::bail!("a repository URL is required unless --resume is given");
        };
        let outcome = client.validate(&conversation, url).await?;
        println!("{}", outcome.report.render());
    }

    for question in &args.ask {
        println!("> {question}");
        println!("{}\n", client.follow_up(&conversation, question).await?);
    }

    println!("conversation: {conversation}");
    Ok(())
}
