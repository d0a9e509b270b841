//! Documented starter config written by `hunter init`.

/// TOML template listing every option with its default.
pub fn default_config_template(timezone: &str) -> String {
    format!(
        r##"# hunter configuration
#
# Environment variables are substituted in every value: ${{VAR}} or
# ${{VAR:-fallback}}. Run `hunter check` after editing.

[scheduler]
tick_interval = "1s"              # How often due jobs are checked (max 60s)
timezone = "{timezone}"           # IANA zone wall-clock schedules use
max_concurrent_jobs = 8           # Job tasks allowed to run at once
freshness_window = "2h"           # A dependency must have succeeded this recently
shutdown_grace = "30s"            # Wait for running jobs on shutdown, then abort
reconcile_on_startup = true       # Close runs left "running" by a crashed process
builtin_jobs = true               # prune_history, resource_monitor, process_health

[heartbeat]
enabled = true
every = "30m"                     # Detailed report
quick_every = "10m"               # Short status, only sent when something is off
include_system = true             # Sample memory, CPU and disk
memory_threshold = 85.0
cpu_threshold = 80.0
disk_threshold = 90.0

[history]
# database = "/var/lib/hunter/hunter.db"   # Default: hunter.db in the data dir
retention_days = 30

[telegram]
enabled = false
# bot_token = "${{HUNTER_TELEGRAM_BOT_TOKEN}}"
# chat_id = "${{HUNTER_TELEGRAM_CHAT_ID}}"
# api_url = "https://api.telegram.org"
timeout = "10s"

[metrics]
enabled = false
# textfile = "/var/lib/node_exporter/textfile/hunter.prom"
textfile_interval = "60s"

# A companion process restarted when its health check fails.
# [supervisor]
# name = "http-server"
# command = "python3"
# args = ["http_server.py", "--port", "3001"]
# health_url = "http://127.0.0.1:3001/health"
# health_check_interval = "30s"
# startup_timeout = "30s"
# unhealthy_threshold = 3
# max_restarts_per_hour = 5
# base_backoff = "30s"
# max_backoff = "5m"
# circuit_breaker_threshold = 3
# circuit_cooldown = "15m"

# Scheduled commands. Schedule types:
#   {{ type = "hourly", minute = ":05" }}
#   {{ type = "daily", time = "09:00" }}
#   {{ type = "weekly", day = "monday,friday", time = "08:30" }}
#   {{ type = "weekdays", time = "07:45" }}
#   {{ type = "interval", value = 15, unit = "minutes" }}
#
# [[jobs]]
# name = "crypto_news"
# command = "python3"
# args = ["crypto_news_bridge.py"]
# schedule = {{ type = "hourly", minute = ":15" }}
# category = "data_ingestion"
# priority = "high"
# timeout = "10m"
#
# [[jobs]]
# name = "daily_digest"
# command = "python3"
# args = ["digest.py"]
# schedule = {{ type = "daily", time = "08:00" }}
# category = "content_generation"
# dependencies = ["crypto_news"]
"##
    )
}
