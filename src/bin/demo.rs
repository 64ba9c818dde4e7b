use coppermind_memory::chat::{ChatService, IncomingMessage};
use coppermind_memory::clock::{Clock, SystemClock};
use coppermind_memory::config::Config;
use coppermind_memory::daemons::{KnowledgeDaemon, SummaryDaemon};
use coppermind_memory::domain::Agent;
use coppermind_memory::llm::MockLanguageModel;
use coppermind_memory::store::{InMemoryStore, Store};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();
    dotenv::dotenv().ok();

    info!("memory engine demo starting");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new(clock.clone()));
    let llm = Arc::new(MockLanguageModel::new());
    let config = Config::from_env();

    store
        .save_agent(Agent {
            id: "demo-agent".to_string(),
            name: "Demo Agent".to_string(),
            identity: "You are a friendly demo assistant with a good memory.".to_string(),
        })
        .await?;

    llm.add_send_message_response(coppermind_memory::domain::LlmResponse {
        content: "Hello! I'm a mock reply since no real model is wired up.".to_string(),
        artifacts: vec![],
    });

    let chat = ChatService::new(store.clone(), llm.clone(), clock.clone(), config.chat.clone());

    let reply = chat
        .send_message(
            IncomingMessage {
                agent: "demo-agent".to_string(),
                user: "demo-user".to_string(),
                content: "Hi there!".to_string(),
                conversation: String::new(),
            },
            &CancellationToken::new(),
        )
        .await?;

    info!(conversation = %reply.conversation, "demo turn complete");
    println!("Agent reply: {}", reply.content);

    let summary_daemon = Arc::new(SummaryDaemon::new(store.clone(), llm.clone(), clock.clone(), config.summary));
    let knowledge_daemon = Arc::new(KnowledgeDaemon::new(store, llm, clock, config.knowledge));
    summary_daemon.sweep_once().await?;
    knowledge_daemon.sweep_once().await?;

    Ok(())
}
