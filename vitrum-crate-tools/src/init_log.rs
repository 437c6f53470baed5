use std::io::Write;

/// 初始化全局 logger
///
/// 默认级别为 `default_level`，可以通过 `RUST_LOG` 环境变量覆盖。
/// 重复调用时只有第一次生效（测试中会被多次调用）。
pub fn init_log(default_level: log::LevelFilter) {
    let _ = env_logger::Builder::new()
        .format(|buf, record| {
            let info_style = buf
                .default_level_style(log::Level::Info)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green)));
            let warn_style = buf
                .default_level_style(log::Level::Warn)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow)));
            let error_style = buf
                .default_level_style(log::Level::Error)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red)));

            let level_style = match record.level() {
                log::Level::Info => info_style,
                log::Level::Warn => warn_style,
                log::Level::Error => error_style,
                _ => buf.default_level_style(record.level()),
            };
            let grey_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));

            let line = record.line().unwrap_or(!0);
            let file = short_file_name(record.file().unwrap_or(""));
            let time = chrono::Local::now().format("%H:%M:%S%.3f");
            let level = record.level();

            writeln!(
                buf,
                "{level_style}[{time}] {level:<5}{level_style:#} {grey_style}[{file}:{line}]{grey_style:#} {}",
                record.args()
            )
        })
        .filter(None, default_level)
        .parse_default_env()
        .try_init();
}

/// 只保留文件名，兼容 windows 和 unix 的路径分隔符
fn short_file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_file_name() {
        assert_eq!(short_file_name("src/frame_scheduler.rs"), "frame_scheduler.rs");
        assert_eq!(short_file_name("engine\\crates\\lib.rs"), "lib.rs");
        assert_eq!(short_file_name("main.rs"), "main.rs");
    }

    #[test]
    fn test_init_twice() {
        init_log(log::LevelFilter::Debug);
        init_log(log::LevelFilter::Info);
        log::info!("logger initialized");
    }
}
