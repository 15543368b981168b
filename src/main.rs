//! Switchboard - 电信客服对话状态管理器
//!
//! 入口：初始化日志与配置，组装编排器，登录后进入终端对话循环。

use std::sync::Arc;

use anyhow::Context;
use switchboard::core::create_builder;
use switchboard::llm::create_llm_from_config;
use switchboard::observability;
use switchboard::tools::{ConsoleInput, DeferredInput, ParameterSource};

const EXIT_WORDS: [&str; 5] = ["q", "quit", "exit", "çık", "çıkış"];

fn is_exit(input: &str) -> bool {
    EXIT_WORDS.contains(&input.to_lowercase().as_str())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let builder = create_builder(None);
    let cfg = builder.config().clone();
    let llm = create_llm_from_config(&cfg.llm);

    // 终端提问与 REPL 共用同一个 stdin 读取器
    let console = Arc::new(ConsoleInput::new(cfg.tools.input_timeout_secs));
    let input: Arc<dyn ParameterSource> = if cfg.tools.interactive {
        console.clone()
    } else {
        Arc::new(DeferredInput)
    };
    let orchestrator = builder
        .with_llm(llm.clone())
        .with_input(input)
        .build()
        .await
        .context("Failed to build orchestrator")?;

    println!("Switchboard müşteri asistanı. Çıkmak için 'q' yazın.");

    let national_id = loop {
        let Some(tc) = console.read_line("T.C. kimlik numaranız: ").await else {
            return Ok(());
        };
        if is_exit(&tc) {
            return Ok(());
        }
        match orchestrator.login(&tc).await {
            Ok(user_id) => {
                println!("Kimlik doğrulandı. Hoş geldiniz ({}).", user_id);
                break tc;
            }
            Err(e) => println!("{}", e),
        }
    };

    while let Some(message) = console.read_line("Siz: ").await {
        if message.is_empty() {
            continue;
        }
        if is_exit(&message) {
            break;
        }
        let outcome = orchestrator.process(&national_id, &message).await;
        match (outcome.response, outcome.error) {
            (Some(reply), _) => println!("Asistan: {}", reply),
            (None, Some(error)) => println!("Hata: {}", error),
            (None, None) => println!("Asistan: {}", switchboard::core::orchestrator::EMPTY_REPLY_FALLBACK),
        }
    }

    observability::report_token_usage(llm.as_ref());
    println!("Görüşmek üzere!");
    Ok(())
}
