use std::process::ExitCode;

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    env_logger::init();

    match ebt_dose::app::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::from(err.exit_code())
        }
    }
}
