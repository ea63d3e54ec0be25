use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_error::ErrorLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

mod context;
mod controller;
mod domain;
mod field;
mod filter;
mod form;
mod inputter;
mod menu;
mod model;
mod persist;
mod storage;
mod table;
mod ui;

use context::TableContext;
use controller::Controller;
use domain::{DEFAULT_DEBOUNCE_MS, DEFAULT_STORAGE_KEY, TableConfig, TableError};
use model::{Model, Status};
use persist::Persisted;
use storage::create_storage_service;
use table::{TableData, demo_data};
use ui::TableUI;

/// A tui based, schema driven record table editor.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// JSON file with the initial {schema, records}. Demo data is used otherwise.
    #[arg(long)]
    data: Option<PathBuf>,

    /// Storage key the table is persisted under
    #[arg(long, default_value = DEFAULT_STORAGE_KEY)]
    key: String,

    /// `local-storage` persists to disk, anything else keeps data in memory
    #[arg(long, env = "RECTAB_STORAGE")]
    storage: Option<String>,

    #[arg(long, default_value = "~/.local/share/rectab")]
    storage_dir: String,

    /// Delay before a change is written
    #[arg(long, default_value_t = DEFAULT_DEBOUNCE_MS)]
    debounce_ms: u64,

    /// Event poll time
    #[arg(long, default_value_t = 100)]
    poll_ms: u64,

    #[arg(long, default_value = "rectab.log")]
    log_file: PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = init_logging(&args.log_file) {
        eprintln!("Error: {e}");
        return ExitCode::FAILURE;
    }

    let result = run(args);
    ratatui::restore();
    match result {
        Err(e) => {
            error!("Exiting with error: {e:?}");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
        Ok(_) => ExitCode::SUCCESS,
    }
}

fn init_logging(path: &Path) -> Result<(), TableError> {
    let file = File::create(path)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false),
        )
        .with(ErrorLayer::default())
        .try_init()
        .map_err(|e| TableError::ConfigError(e.to_string()))
}

fn build_config(args: &Args) -> Result<TableConfig, TableError> {
    let storage_dir = shellexpand::full(&args.storage_dir)
        .map_err(|e| TableError::ConfigError(format!("storage dir: {e}")))?;
    Ok(TableConfig::default()
        .event_poll_time(args.poll_ms)
        .storage(args.storage.as_deref())
        .storage_dir(storage_dir.into_owned())
        .storage_key(args.key.as_str())
        .debounce(Duration::from_millis(args.debounce_ms)))
}

fn run(args: Args) -> Result<(), TableError> {
    let cfg = build_config(&args)?;
    info!("Starting rectab with {:?}", cfg);

    let initial = match &args.data {
        Some(path) => TableData::load(path)?,
        None => demo_data()?,
    };
    let storage = create_storage_service(
        cfg.storage,
        &cfg.storage_dir,
        Box::new(|d: &TableData| d.validate()),
    );
    let state = Persisted::new(&cfg.storage_key, storage, initial, cfg.debounce);

    let ui = TableUI::new(&cfg);
    let controller = Controller::new(&cfg);
    let mut terminal = ratatui::init();
    let size = terminal.size()?;

    let mut model = Model::init(
        &cfg,
        TableContext::new(state),
        size.width as usize,
        size.height as usize,
    );
    model.set_on_selection_change(|indices, _rows| {
        info!("Selected records: {indices:?}");
    });

    terminal.draw(|f| ui.draw(&model, f))?;
    model.mount();

    let result = event_loop(&mut model, &ui, &controller, &mut terminal);
    model.shutdown();
    result
}

fn event_loop(
    model: &mut Model,
    ui: &TableUI,
    controller: &Controller,
    terminal: &mut ratatui::DefaultTerminal,
) -> Result<(), TableError> {
    while model.status != Status::QUITTING {
        // Render the current view
        terminal.draw(|f| ui.draw(model, f))?;

        // Handle events and map to a Message
        let message = controller.handle_event(model)?;
        model.update(message)?;

        // Perform a due write
        model.tick();
    }
    Ok(())
}
