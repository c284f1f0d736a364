use clap::Parser;
use std::path::PathBuf;

// tracerobot - 将测试运行器的生命周期事件记录为 Robot Framework 报告
#[derive(Parser, Debug)]
#[clap(
    name = "tracerobot",
    version,
    about = "Record test runner lifecycle events as a Robot Framework report",
    after_help = "EVENT STREAM:\n  One JSON object per line, tagged by \"event\":\n  session_start, test_location, fixture_setup_begin, fixture_setup_end,\n  phase_report, session_finish\n\nEXAMPLES:\n  tracerobot events.jsonl\n  my-runner --emit-events | tracerobot --robot-output reports/output.xml\n  tracerobot -c tracerobot.toml -v events.jsonl"
)]
pub struct CliArgs {
    // Event stream - JSON lines file, stdin when omitted or "-"
    // 事件流 - JSON lines 文件，省略或为 "-" 时读取标准输入
    #[clap(value_name = "EVENTS", help = "Event stream file (stdin when omitted or \"-\")")]
    pub events: Option<PathBuf>,

    // Robot output - Path of the generated Robot Framework XML
    // 输出路径 - 生成的 Robot Framework XML 路径
    #[clap(long = "robot-output", value_name = "PATH", help = "Path to Robot Framework XML output [default: output.xml]")]
    pub robot_output: Option<PathBuf>,

    // Config file - Optional TOML settings
    // 配置文件 - 可选的 TOML 配置
    #[clap(short = 'c', long = "config", value_name = "FILE", help = "TOML configuration file")]
    pub config: Option<PathBuf>,

    // Verbose mode - Show every hook dispatch
    // 详细模式 - 显示更多日志信息
    #[clap(short = 'v', long = "verbose", help = "Enable verbose logging")]
    pub verbose: bool,

    // Quiet mode - Only errors
    // 安静模式 - 只显示错误
    #[clap(short = 'q', long = "quiet", help = "Suppress non-essential output")]
    pub quiet: bool,
}

impl CliArgs {
    /// Parse command line arguments
    /// 解析命令行参数
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get log level
    /// 获取日志级别
    pub fn get_log_level(&self) -> &str {
        if self.quiet {
            "error"
        } else if self.verbose {
            "debug"
        } else {
            "info"
        }
    }

    /// Event stream path, `None` for stdin
    pub fn events_path(&self) -> Option<&PathBuf> {
        self.events.as_ref().filter(|p| p.as_os_str() != "-")
    }
}
