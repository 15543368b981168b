//! 参数收集通道
//!
//! 执行器缺参时通过 ParameterSource 取值：终端模式阻塞询问（可带超时），
//! 延迟模式直接返回 None，由执行器把意图挂到 pending_intent，下一轮补齐。

use std::collections::VecDeque;
use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

/// 参数来源
#[async_trait]
pub trait ParameterSource: Send + Sync {
    /// 询问参数；None 表示拿不到（非交互、超时或输入结束）
    async fn request(&self, param: &str, prompt: &str) -> Option<String>;

    /// 输入无效时的提示（默认忽略）
    async fn report_invalid(&self, _message: &str) {}
}

/// 终端输入：与 REPL 共用同一个 stdin 行读取器
pub struct ConsoleInput {
    lines: Mutex<Lines<BufReader<Stdin>>>,
    timeout: Option<Duration>,
}

impl ConsoleInput {
    pub fn new(timeout_secs: Option<u64>) -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
            timeout: timeout_secs.map(Duration::from_secs),
        }
    }

    /// 打印提示并读一行（去掉首尾空白）；EOF 或读错返回 None
    pub async fn read_line(&self, prompt: &str) -> Option<String> {
        print!("{}", prompt);
        let _ = std::io::stdout().flush();
        let mut lines = self.lines.lock().await;
        match lines.next_line().await {
            Ok(Some(line)) => Some(line.trim().to_string()),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("stdin read failed: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl ParameterSource for ConsoleInput {
    async fn request(&self, param: &str, prompt: &str) -> Option<String> {
        let Some(limit) = self.timeout else {
            return self.read_line(prompt).await;
        };
        match tokio::time::timeout(limit, self.read_line(prompt)).await {
            Ok(line) => line,
            Err(_) => {
                tracing::warn!(param, "Parameter prompt timed out after {:?}", limit);
                println!();
                None
            }
        }
    }

    async fn report_invalid(&self, message: &str) {
        println!("{}", message);
    }
}

/// 延迟收集：从不阻塞
#[derive(Debug, Default)]
pub struct DeferredInput;

#[async_trait]
impl ParameterSource for DeferredInput {
    async fn request(&self, _param: &str, _prompt: &str) -> Option<String> {
        None
    }
}

/// 预置答案队列（脚本化会话与测试），用完后视为拿不到
#[derive(Debug, Default)]
pub struct QueuedInput {
    answers: Mutex<VecDeque<String>>,
    asked: Mutex<Vec<String>>,
    invalid: Mutex<Vec<String>>,
}

impl QueuedInput {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            asked: Mutex::default(),
            invalid: Mutex::default(),
        }
    }

    /// 按顺序被询问过的参数名
    pub async fn asked(&self) -> Vec<String> {
        self.asked.lock().await.clone()
    }

    pub async fn invalid_reports(&self) -> usize {
        self.invalid.lock().await.len()
    }
}

#[async_trait]
impl ParameterSource for QueuedInput {
    async fn request(&self, param: &str, _prompt: &str) -> Option<String> {
        self.asked.lock().await.push(param.to_string());
        self.answers.lock().await.pop_front()
    }

    async fn report_invalid(&self, message: &str) {
        self.invalid.lock().await.push(message.to_string());
    }
}
