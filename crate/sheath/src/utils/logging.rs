use env_logger::Builder;
use std::io::Write;

/// Initialize logging with app-wide defaults.
///
/// Level defaults to WARN and can be overridden with the RUST_LOG env
/// variable. Setting RUST_LOG_FORMAT to SYSTEMD switches the output to
/// a syslog-friendly format.
pub fn init() {
    let mut builder = Builder::new();

    if std::env::var("RUST_LOG_FORMAT").is_ok_and(|format| format == "SYSTEMD") {
        enable_systemd_log_format(&mut builder);
    }

    builder.filter_level(log::LevelFilter::Warn);
    builder.parse_default_env();
    builder.init();
}

/// Prefix each line with the syslog priority (RFC 5424) so
/// systemd/syslog classify levels correctly. No timestamp; the logging
/// facility tracks that already.
fn enable_systemd_log_format(builder: &mut Builder) {
    builder.format(|fmt, record| {
        writeln!(
            fmt,
            "<{}>{}: {}",
            match record.level() {
                log::Level::Error => 3,
                log::Level::Warn => 4,
                log::Level::Info => 5,
                log::Level::Debug | log::Level::Trace => 7,
            },
            record.target(),
            record.args()
        )
    });
}
