//! Fluxo CLI - track administrative processes across sectors.

use chrono::{Local, NaiveDate};
use clap::Parser;
use fluxo::cli::{
    Cli, Commands, ConfigCommands, FiltersCommands, ProcessCommands, SystemCommands,
    UserCommands, parse_sort,
};
use fluxo::commands::{self, Output};
use fluxo::config::{ConfigOverrides, OutputFormat, ResolvedConfig, resolve_config};
use fluxo::export::ExportFormat;
use fluxo::models::MovementFields;
use fluxo::query::FilterState;
use fluxo::storage::get_data_dir;
use std::path::Path;
use std::process;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the tracing filter (e.g. `debug`, `fluxo=info`).
const LOG_ENV: &str = "FLUXO_LOG";

fn main() {
    init_tracing();

    let cli = Cli::parse();
    let flag_human = cli.human_readable;

    let data_dir = match get_data_dir(cli.data_dir.as_deref()) {
        Ok(dir) => dir,
        Err(e) => exit_with(&e, flag_human),
    };

    let overrides = if flag_human {
        ConfigOverrides::new().with_output_format(OutputFormat::Human)
    } else {
        ConfigOverrides::new()
    };
    let config = match resolve_config(&data_dir, &overrides) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(error = %e, "ignoring unreadable config.kdl");
            ResolvedConfig::default()
        }
    };
    let human = config.output_format.value == OutputFormat::Human;

    if let Err(e) = run_command(cli.command, &data_dir, &config, human) {
        exit_with(&e, human);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn exit_with(e: &fluxo::Error, human: bool) -> ! {
    tracing::debug!(error = ?e, "command failed");
    if human {
        eprintln!("Error: {}", e);
    } else {
        let err = serde_json::json!({
            "error": e.to_string(),
            "kind": e.kind(),
        });
        eprintln!("{}", err);
    }
    process::exit(1);
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn run_command(
    command: Commands,
    data_dir: &Path,
    config: &ResolvedConfig,
    human: bool,
) -> Result<(), fluxo::Error> {
    let fetch_cap = config.fetch_cap.value;

    match command {
        Commands::System { command } => match command {
            SystemCommands::Init => output(&commands::system_init(data_dir)?, human),
            SystemCommands::Version => output(&commands::version(), human),
        },

        Commands::User { command } => match command {
            UserCommands::Add {
                email,
                name,
                password,
                confirm,
            } => output(
                &commands::user_add(data_dir, &email, &name, &password, &confirm)?,
                human,
            ),
            UserCommands::BootstrapAdmin { email } => {
                output(&commands::user_bootstrap_admin(data_dir, &email)?, human)
            }
            UserCommands::Login { email, password } => {
                output(&commands::user_login(data_dir, &email, &password)?, human)
            }
            UserCommands::Logout => output(&commands::user_logout(data_dir)?, human),
            UserCommands::Whoami => output(&commands::user_whoami(data_dir)?, human),
        },

        Commands::Process { command } => match command {
            ProcessCommands::Add {
                number,
                entry_date,
                fields,
            } => {
                let fields = MovementFields {
                    number: Some(number),
                    entry_date,
                    ..fields.into_fields()
                };
                output(&commands::process_add(data_dir, fields, today())?, human)
            }
            ProcessCommands::Move {
                number,
                entry_date,
                fields,
            } => output(
                &commands::process_move(
                    data_dir,
                    &number,
                    entry_date,
                    fields.into_fields(),
                    today(),
                )?,
                human,
            ),
            ProcessCommands::Edit {
                id,
                number,
                entry_date,
                fields,
                clear_deadline,
                clear_exit_date,
            } => {
                let mut fields = MovementFields {
                    number,
                    entry_date,
                    ..fields.into_fields()
                };
                if clear_deadline {
                    fields.deadline = Some(None);
                }
                if clear_exit_date {
                    fields.exit_date = Some(None);
                }
                output(&commands::process_edit(data_dir, &id, fields, today())?, human)
            }
            ProcessCommands::Delete { id } => {
                output(&commands::process_delete(data_dir, &id, today())?, human)
            }
            ProcessCommands::Show { id } => {
                output(&commands::process_show(data_dir, &id, today())?, human)
            }
            ProcessCommands::History { number } => {
                output(&commands::process_history_for(data_dir, &number)?, human)
            }
            ProcessCommands::List {
                filters,
                sort,
                order,
                page,
                per_page,
                saved,
                save,
            } => {
                let mut state = if saved {
                    commands::saved_filters(data_dir)?
                } else {
                    FilterState {
                        items_per_page: config.items_per_page.value,
                        ..Default::default()
                    }
                };
                filters.apply_to(&mut state);

                let (field, direction) = parse_sort(sort.as_deref(), order.as_deref())
                    .map_err(fluxo::Error::InvalidInput)?;
                if field.is_some() {
                    state.sort_field = field;
                }
                if let Some(direction) = direction {
                    state.sort_order = direction;
                }
                if let Some(page) = page {
                    state.page = page;
                }
                if let Some(per_page) = per_page {
                    state.items_per_page = per_page;
                }

                output(
                    &commands::process_list(data_dir, state, save, today())?,
                    human,
                )
            }
            ProcessCommands::Current { filters } => output(
                &commands::process_current(data_dir, filters.to_state(), fetch_cap, today())?,
                human,
            ),
        },

        Commands::Dashboard { today: reference } => output(
            &commands::dashboard(data_dir, fetch_cap, reference.unwrap_or_else(today))?,
            human,
        ),

        Commands::Filters { command } => match command {
            FiltersCommands::Show => output(&commands::filters_show(data_dir)?, human),
            FiltersCommands::Clear => output(&commands::filters_clear(data_dir)?, human),
        },

        Commands::Import { file, batch_size } => {
            let batch_size = batch_size.unwrap_or(config.import_batch_size.value);
            output(
                &commands::import_csv(data_dir, &file, batch_size as usize, today())?,
                human,
            )
        }

        Commands::Export {
            format,
            output: path,
            filters,
        } => {
            let format = ExportFormat::parse(&format).ok_or_else(|| {
                fluxo::Error::InvalidInput(format!(
                    "unknown export format '{}': use csv or report",
                    format
                ))
            })?;
            output(
                &commands::export_current(
                    data_dir,
                    format,
                    &path,
                    filters.to_state(),
                    fetch_cap,
                    today(),
                )?,
                human,
            )
        }

        Commands::Log { limit } => output(&commands::log_list(data_dir, limit)?, human),

        Commands::Config { command } => match command {
            ConfigCommands::Get { key } => output(&commands::config_get(data_dir, &key)?, human),
            ConfigCommands::Set { key, value, system } => output(
                &commands::config_set(data_dir, &key, &value, system)?,
                human,
            ),
            ConfigCommands::List => output(&commands::config_list(data_dir)?, human),
        },
    }

    Ok(())
}

fn output<T: Output>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}
