use std::{collections::BTreeMap, process::ExitCode};

use clap::Parser;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::task::JoinSet;
use uuid::Uuid;

/// Fires concurrent first-time votes at a running server and checks the tally.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:3333")]
    url: String,

    /// Poll to vote on, random when omitted.
    #[arg(long)]
    poll: Option<Uuid>,

    /// Option to vote for, random when omitted.
    #[arg(long)]
    option: Option<Uuid>,

    #[arg(long, default_value_t = 100)]
    votes: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Standing {
    poll_option_id: Uuid,
    votes: i64,
}

#[derive(Deserialize)]
struct PollResults {
    standings: Vec<Standing>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let poll = args.poll.unwrap_or_else(Uuid::new_v4);
    let option = args.option.unwrap_or_else(Uuid::new_v4);
    let client = Client::new();

    println!("Poll: {poll}");
    println!("Option: {option}");
    println!("Votes: {}\n", args.votes);

    let before = match votes_for(&client, &args.url, poll, option).await {
        Ok(votes) => votes,
        Err(e) => {
            eprintln!("Failed to read standings: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut tasks = JoinSet::new();
    for _ in 0..args.votes {
        let client = client.clone();
        let url = format!("{}/polls/{poll}/votes", args.url);
        tasks.spawn(async move {
            client
                .post(url)
                .json(&vote_body(option))
                .send()
                .await
                .map(|response| response.status())
        });
    }

    let mut statuses: BTreeMap<String, u32> = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        let key = match joined {
            Ok(Ok(status)) => status.to_string(),
            Ok(Err(e)) => format!("error: {e}"),
            Err(e) => format!("panic: {e}"),
        };
        *statuses.entry(key).or_insert(0) += 1;
    }

    for (status, count) in &statuses {
        println!("{status}: {count}");
    }

    let after = match votes_for(&client, &args.url, poll, option).await {
        Ok(votes) => votes,
        Err(e) => {
            eprintln!("Failed to read standings: {e}");
            return ExitCode::FAILURE;
        }
    };

    let created = statuses
        .get(&StatusCode::CREATED.to_string())
        .copied()
        .unwrap_or(0);
    println!("\nTally: {before} -> {after} ({created} created)");

    if after - before == i64::from(created) {
        ExitCode::SUCCESS
    } else {
        eprintln!("Tally drifted from accepted votes");
        ExitCode::FAILURE
    }
}

fn vote_body(option: Uuid) -> BTreeMap<&'static str, Uuid> {
    BTreeMap::from([("pollOptionId", option)])
}

async fn votes_for(
    client: &Client,
    url: &str,
    poll: Uuid,
    option: Uuid,
) -> Result<i64, reqwest::Error> {
    let results: PollResults = client
        .get(format!("{url}/polls/{poll}"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    Ok(results
        .standings
        .iter()
        .find(|standing| standing.poll_option_id == option)
        .map(|standing| standing.votes)
        .unwrap_or(0))
}
