//! Banking Chat Example
//!
//! This example demonstrates how to:
//! - Build an agent from a configuration
//! - Hold a multi-turn conversation with slot filling and confirmation
//! - Query the session read models afterwards
//!
//! Pass a JSON configuration path as the first argument to override the
//! defaults.

use anyhow::Context as _;
use std::sync::Arc;

use cim_dialog_agent::{Agent, AgentConfig, SessionQuery, SessionQueryHandler, SessionQueryResult};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => AgentConfig::load(&path)?,
        None => AgentConfig::default(),
    };

    println!("=== Banking Dialog Agent Example ===\n");
    let agent = Agent::banking(config);
    agent.set_display_name("cliente-42", "Ana").await;

    let script = [
        "Bom dia!",
        "O que é PIX?",
        "Quero transferir 250 reais via PIX",
        "para Bia",
        "Qual é o meu saldo?",
        "Sim",
        "Tchau",
    ];

    for line in script {
        println!("USER:  {line}");
        for reply in agent.chat("cliente-42", line).await {
            println!("AGENT: {reply}");
        }
        println!();
    }

    let handler = SessionQueryHandler::new(Arc::clone(agent.sessions()));
    if let SessionQueryResult::Statistics(stats) = handler.execute(SessionQuery::Statistics).await {
        println!(
            "{}",
            serde_json::to_string_pretty(&stats).context("serializing statistics")?
        );
    }

    Ok(())
}
