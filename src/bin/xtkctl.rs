//! xtkctl - talk to xtk applications from the command line
//!
//! # Examples
//!
//! ```bash
//! # List the applications registered on the display
//! xtkctl interps
//!
//! # Evaluate a script in another application
//! xtkctl send demo winfo geometry .
//!
//! # Run an application that other processes can send to
//! xtkctl serve --name demo --geometry 300x200+40+40
//! ```

use std::rc::Rc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use xtk::{CommandInterp, Config, InterpId, Toolkit};

/// xtkctl - inspect and drive xtk applications
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// X display (default: $DISPLAY)
    #[arg(long, global = true)]
    display: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered application names
    Interps {
        /// Print a JSON array instead of one name per line
        #[arg(long)]
        json: bool,
    },

    /// Evaluate a script in a registered application
    Send {
        /// Do not wait for the result
        #[arg(long = "async")]
        async_: bool,
        /// Target application name
        app: String,
        /// Script words, joined with spaces
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        script: Vec<String>,
    },

    /// Register an application and answer sends until its main window is
    /// destroyed
    Serve {
        /// Name to register (default from the config file)
        #[arg(long)]
        name: Option<String>,
        /// Initial geometry of the main window
        #[arg(long)]
        geometry: Option<String>,
        /// Title of the main window
        #[arg(long)]
        title: Option<String>,
    },
}

/// A toolkit with one unmapped application to send from
fn client(config: Config, display: Option<&str>) -> Result<(Toolkit, InterpId)> {
    let mut tk = Toolkit::new(config);
    let display = tk.open_display(display)?;
    let (app, _) = tk.create_app(display, "Xtkctl")?;
    let interp = tk.add_interp(app, Rc::new(CommandInterp::new(app)));
    Ok((tk, interp))
}

fn serve(
    config: Config,
    display: Option<&str>,
    name: Option<String>,
    geometry: Option<String>,
    title: Option<String>,
) -> Result<()> {
    let name = name.unwrap_or_else(|| config.general.app_name.clone());
    let class = config.general.app_class.clone();
    let mut tk = Toolkit::new(config);
    let display = tk.open_display(display)?;
    let (app, main) = tk.create_app(display, &class)?;
    let interp = tk.add_interp(app, Rc::new(CommandInterp::new(app)));
    let actual = tk.set_app_name(interp, &name)?;
    tk.set_title(main, title.as_deref().unwrap_or(&actual))?;
    if let Some(geometry) = geometry {
        tk.set_geometry(main, &geometry)?;
    }
    tk.map_window(main)?;
    log::info!("serving as \"{}\"", actual);
    println!("{}", actual);

    while tk.registry.apps.get(app).is_some_and(|a| a.alive) {
        tk.do_one_event(true)?;
        for delivered in tk.take_delivered() {
            log::debug!("{}: {:?}", delivered.path, delivered.event);
        }
    }
    log::info!("main window destroyed, exiting");
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = Config::load();
    let display = cli.display.as_deref();

    match cli.command {
        Commands::Interps { json } => {
            let mut tk = Toolkit::new(config);
            let display = tk.open_display(display)?;
            let names = tk.interps(display)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&names)?);
            } else {
                for name in names {
                    println!("{}", name);
                }
            }
        }
        Commands::Send { async_, app, script } => {
            let (mut tk, interp) = client(config, display)?;
            match tk.send(interp, &app, &script.join(" "), async_) {
                Ok(result) => {
                    if !result.is_empty() {
                        println!("{}", result);
                    }
                }
                Err(e) => {
                    eprintln!("Error: {}", e.trace());
                    if let Some(code) = &e.error_code {
                        eprintln!("Error code: {}", code);
                    }
                    std::process::exit(1);
                }
            }
            tk.update().context("flushing asynchronous send")?;
        }
        Commands::Serve { name, geometry, title } => serve(config, display, name, geometry, title)?,
    }
    Ok(())
}
