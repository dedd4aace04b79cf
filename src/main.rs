//! 考试会话命令行入口
//! 恢复会话、登录、登出与查看考试组解锁状态

use chrono::Utc;
use exam_session::{config::AppConfig, context::AppContext, models::exam::ExamStatus, telemetry};
use secrecy::Secret;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ===== CLI 参数处理 =====
    let args: Vec<String> = std::env::args().skip(1).collect();

    let command = match args.first().map(String::as_str) {
        Some("--version") => {
            println!("exam-session {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some("--help") => {
            print_help();
            return Ok(());
        }
        None => Command::Status,
        Some("status") => Command::Status,
        Some("logout") => Command::Logout,
        Some("login") => match (args.get(1), args.get(2)) {
            (Some(email), Some(password)) => Command::Login {
                email: email.clone(),
                password: Secret::new(password.clone()),
                remember: args.iter().skip(3).any(|a| a == "--remember"),
            },
            _ => {
                eprintln!("用法: exam-session login <email> <password> [--remember]");
                std::process::exit(1);
            }
        },
        Some("unlock") => match args.get(1).and_then(|id| id.parse::<i64>().ok()) {
            Some(group_id) => Command::Unlock { group_id },
            None => {
                eprintln!("用法: exam-session unlock <exam_group_id>");
                std::process::exit(1);
            }
        },
        Some(other) => {
            eprintln!("未知参数: {}", other);
            print_help();
            std::process::exit(1);
        }
    };

    // 加载 .env 文件（开发环境）
    if let Ok(env) = std::env::var("EXAM_ENV") {
        dotenv::from_filename(format!(".env.{}", env)).ok();
    } else {
        dotenv::from_filename(".env.local").ok();
        dotenv::dotenv().ok();
    }

    // 1. 加载配置
    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        anyhow::anyhow!("Failed to load configuration: {}", e)
    })?;

    // 2. 初始化日志
    telemetry::init_telemetry(&config.logging);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "exam-session starting");

    // 3. 组装应用
    let context = AppContext::init(config)?;
    let result = run(&context, command).await;
    context.teardown();
    result
}

enum Command {
    Status,
    Login {
        email: String,
        password: Secret<String>,
        remember: bool,
    },
    Logout,
    Unlock {
        group_id: i64,
    },
}

async fn run(context: &AppContext, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Status => {
            let session = context.boot().await;
            match &session.user {
                Some(user) if session.is_authenticated() => {
                    println!("已登录: {} <{}> ({:?})", user.name, user.email, user.role);
                }
                _ => println!("未登录"),
            }
            if let Some(email) = context.auth.remembered_email() {
                println!("记住的邮箱: {}", email);
            }
        }
        Command::Login {
            email,
            password,
            remember,
        } => {
            let user = context
                .auth
                .login(&email, &password, remember)
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!("登录成功: {} ({:?})", user.name, user.role);
        }
        Command::Logout => {
            context.auth.logout();
            println!("已登出");
        }
        Command::Unlock { group_id } => {
            let session = context.boot().await;
            if !session.is_authenticated() {
                anyhow::bail!("请先登录");
            }

            let flow = context.exam_flow()?;
            flow.initialize(&context.client, group_id, Utc::now())
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;

            let state = flow.current();
            if let Some(group) = &state.group {
                println!("{} (等待 {} 秒)", group.name, group.await_time);
            }
            for exam in &state.exams {
                let label = match exam.status {
                    ExamStatus::Locked => "locked",
                    ExamStatus::Unlocked => "unlocked",
                    ExamStatus::Unlocking => "unlocking",
                    ExamStatus::Completed => "completed",
                };
                println!("  [{}] {} {}", label, exam.exam.code, exam.exam.name);
            }
            if let Some(remaining) = state.remaining_secs {
                println!("剩余 {} 秒解锁下一份试卷", remaining);
            }
            flow.shutdown();
        }
    }
    Ok(())
}

/// 打印帮助信息
fn print_help() {
    println!("exam-session {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("用法: exam-session [命令]");
    println!();
    println!("命令:");
    println!("  status                                 恢复会话并显示当前用户（默认）");
    println!("  login <email> <password> [--remember]  登录");
    println!("  logout                                 登出并清除本地令牌");
    println!("  unlock <exam_group_id>                 显示考试组的解锁状态");
    println!("  --version                              打印版本信息并退出");
    println!("  --help                                 打印此帮助信息并退出");
    println!();
    println!("环境变量:");
    println!("  所有配置通过 EXAM_ 前缀的环境变量完成，例如 EXAM_API__BASE_URL");
}
