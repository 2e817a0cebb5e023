use log::LevelFilter;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::append::rolling_file::policy::compound::CompoundPolicy;
use log4rs::append::rolling_file::policy::compound::roll::fixed_window::FixedWindowRoller;
use log4rs::append::rolling_file::policy::compound::trigger::size::SizeTrigger;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use log4rs::filter::threshold::ThresholdFilter;
use std::path::Path;

const LOG_FILE: &str = "datasetrs.log";
const ROLL_SIZE: u64 = 10 * 1024 * 1024;
const ROLL_COUNT: u32 = 5;

fn rolling_appender(
    dir: &Path,
) -> Result<RollingFileAppender, Box<dyn std::error::Error + Send + Sync>> {
    std::fs::create_dir_all(dir)?;

    let roller = FixedWindowRoller::builder()
        .build(&dir.join("datasetrs.{}.log").to_string_lossy(), ROLL_COUNT)?;
    let policy = CompoundPolicy::new(
        Box::new(SizeTrigger::new(ROLL_SIZE)),
        Box::new(roller),
    );

    let appender = RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S%.6f)} [{l}] [{t}] - {m}{n}",
        )))
        .build(dir.join(LOG_FILE), Box::new(policy))?;
    Ok(appender)
}

/// Initialize file logging under `log_dir`.
///
/// Everything at INFO and above (or the level named in `DATASETRS_LOG`) goes
/// to `run/datasetrs.log`; warnings and errors are also copied to
/// `err/datasetrs.log`. Nothing is written to the
/// console so progress bars stay readable.
pub fn init_logger(log_dir: &Path) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let level = std::env::var("DATASETRS_LOG")
        .ok()
        .and_then(|l| l.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);

    let run = rolling_appender(&log_dir.join("run"))?;
    let err = rolling_appender(&log_dir.join("err"))?;

    let config = Config::builder()
        .appender(Appender::builder().build("run", Box::new(run)))
        .appender(
            Appender::builder()
                .filter(Box::new(ThresholdFilter::new(LevelFilter::Warn)))
                .build("err", Box::new(err)),
        )
        .build(
            Root::builder()
                .appender("run")
                .appender("err")
                .build(level),
        )?;

    log4rs::init_config(config)?;

    log::info!("Logging to {}", log_dir.display());
    Ok(())
}
