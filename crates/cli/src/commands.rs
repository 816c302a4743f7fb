use clap::Subcommand;
use model::pagination::cursor::Cursor;

#[derive(Subcommand)]
pub enum Commands {
    /// Start a migration run and host it until it stops. An unfinished run
    /// is resumed; a finished one restarts from its last checkpoint.
    Start {
        /// Identifier of the run
        run_id: String,

        #[arg(
            long,
            help = "Primary key to continue after, for new or finished runs"
        )]
        cursor: Option<Cursor>,
    },
    /// Host every unfinished run of the task queue until interrupted
    Worker,
    Status {
        run_id: String,

        #[arg(
            long,
            help = "If set, prints the run status as JSON instead of a table"
        )]
        json: bool,
    },
    /// Cancel a run. It stops at its next suspension point.
    Cancel { run_id: String },
}
