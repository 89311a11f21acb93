use std::sync::atomic::AtomicBool;

use clap::{Parser, Subcommand};

use punchcard::commands::reset;
use punchcard::config::Config;
use punchcard::db::connection::{ensure_mandays_cursor, establish_pool};
use punchcard::db::migrations::run_migrations;
use punchcard::engine::processor::AttendanceProcessor;
use punchcard::engine::{absentees, corrections, mandays};
use punchcard::error::EngineError;
use punchcard::scheduler::Scheduler;
use punchcard::sync::external::{self, LogSource};
use punchcard::sync::unify;

#[derive(Parser)]
#[command(name = "punchcard", version, about = "Attendance derivation engine for biometric punch streams")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the periodic scheduler (aligns sequences and backfills absentees first)
    Run,
    /// Pull new punches from the configured external database
    SyncLogs,
    /// Merge the device and manual punch stores into the unified view
    SyncAllLogs,
    /// Materialize absent/week-off/holiday rows for punch-less days
    Absentees {
        /// Trailing days to sweep
        #[arg(long, default_value_t = 400)]
        days: i64,
    },
    /// Consume unprocessed punches into attendance aggregates
    Task,
    /// Rebuild the duty-pair mandays view for recently punched days
    Mandays,
    /// Flip WO to A inside consecutive A,WO,A triples
    CorrectAWoAPattern,
    /// Undo A-WO-A corrections whose neighbouring days changed
    RevertAwoCorrections,
    /// Validate the stored external credential against the upstream
    CheckSource,
    /// Align id sequences with current MAX(id) values
    ResetSequences,
    /// Destructive: clear aggregates, cursors and corrections, then resweep
    ResetAttendance,
    /// Rewind the mandays view by its trailing window
    ResetMandays,
}

#[tokio::main]
async fn main() {
    env_logger::init();

    if let Err(err) = run().await {
        log::error!("{err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), EngineError> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    log::info!("database: {}", config.database_path.display());
    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let pool = establish_pool(&config.database_path).await?;
    run_migrations(&pool).await?;
    ensure_mandays_cursor(&pool).await?;

    match cli.command {
        Command::Run => {
            reset::reset_sequences(&pool).await?;
            absentees::sweep(&pool, &config, config.absentee_days).await?;
            let scheduler = Scheduler::new(pool.clone(), config);
            scheduler.run().await?;
        }
        Command::SyncLogs => {
            let Some(credential) = external::load_credential(&pool).await? else {
                log::warn!("no external database credentials found; sync aborted");
                return Ok(());
            };
            let source = external::connect_source(&credential).await?;
            let total = external::sync_logs(&pool, &source).await?;
            println!("synced {total} punches");
        }
        Command::SyncAllLogs => {
            let (device, manual) = unify::sync_all_logs(&pool).await?;
            println!("unified view refreshed: {device} device rows, {manual} manual rows");
        }
        Command::Absentees { days } => {
            let inserted = absentees::sweep(&pool, &config, days).await?;
            println!("inserted {inserted} absentee rows over {days} day(s)");
        }
        Command::Task => {
            let processor = AttendanceProcessor::load(&pool, &config).await?;
            let cancel = AtomicBool::new(false);
            let tally = processor.run(&cancel).await?;
            println!(
                "processed={} skipped={} new={} partial={}",
                tally.processed, tally.skipped, tally.new, tally.partial
            );
        }
        Command::Mandays => {
            let rebuilt = mandays::run(&pool, &config).await?;
            println!("rebuilt mandays for {rebuilt} day(s)");
        }
        Command::CorrectAWoAPattern => {
            let flipped = corrections::correct_a_wo_a(&pool).await?;
            println!("flipped {flipped} week-off day(s) to absent");
        }
        Command::RevertAwoCorrections => {
            let reverted = corrections::revert_corrections(&pool).await?;
            println!("reverted {reverted} day(s) back to week-off");
        }
        Command::CheckSource => {
            let Some(credential) = external::load_credential(&pool).await? else {
                log::warn!("no external database credentials found");
                return Ok(());
            };
            let source = external::connect_source(&credential).await?;
            source.probe().await?;
            println!(
                "source ok: {} table '{}' with all mapped columns",
                credential.database_type.as_str(),
                credential.table_name
            );
        }
        Command::ResetSequences => {
            let reset = reset::reset_sequences(&pool).await?;
            println!("reset {reset} sequence(s)");
        }
        Command::ResetAttendance => {
            reset::reset_attendance(&pool, &config).await?;
            println!("attendance state cleared and resweep finished");
        }
        Command::ResetMandays => {
            mandays::reset(&pool, &config).await?;
            println!("mandays cursor rewound");
        }
    }

    Ok(())
}
