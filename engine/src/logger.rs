use crate::config::LoggingConfig;
use log::Record;
use std::fmt;
use std::fs;
use std::thread;

/// Installs the global logger: level from configuration, output to the
/// configured file (appending) or to stderr.
pub fn init_logger(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let dispatch = fern::Dispatch::new()
        .format(|out, message, record| out.finish(format_args!("{}", log_line(message, record))))
        .level(config.level.into());

    let dispatch = match &config.file {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir)?;
            }
            dispatch.chain(fern::log_file(path)?)
        }
        None => dispatch.chain(std::io::stderr()),
    };
    dispatch.apply()?;
    Ok(())
}

/// Log line format: timestamp, level, source file/line, thread name, and message.
fn log_line(message: &fmt::Arguments, record: &Record) -> String {
    format!(
        "{} [{:<5}] [{}:{}] [{}] {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        record.level(),
        record.file().unwrap_or("<unknown>"),
        record.line().unwrap_or(0),
        thread::current().name().unwrap_or("<unnamed>"),
        message
    )
}
