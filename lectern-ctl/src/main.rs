use anyhow::Context;
use lectern_api::{AuthToken, NewUser, Role, UserId, Uuid};

#[derive(structopt::StructOpt)]
struct Opt {
    #[structopt(short, long)]
    host: String,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(structopt::StructOpt)]
enum Command {
    /// Create a user
    CreateUser {
        /// Username
        name: String,

        /// Initial password
        initial_password: String,

        /// Create an instructor rather than a student
        #[structopt(long)]
        instructor: bool,
    },
}

fn admin_token() -> anyhow::Result<AuthToken> {
    let tok =
        std::env::var("ADMIN_TOKEN").context("retrieving ADMIN_TOKEN environment variable")?;
    let tok = Uuid::try_parse(&tok).context("parsing ADMIN_TOKEN as an auth token")?;
    Ok(AuthToken(tok))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = <Opt as structopt::StructOpt>::from_args();

    let client = reqwest::Client::new();

    match opt.cmd {
        Command::CreateUser {
            name,
            initial_password,
            instructor,
        } => {
            let role = match instructor {
                true => Role::Instructor,
                false => Role::Student,
            };
            let user = NewUser::new(UserId(Uuid::new_v4()), name, role, &initial_password)?;
            client
                .post(format!("{}/api/admin/create-user", opt.host))
                .json(&user)
                .bearer_auth(admin_token()?.0)
                .send()
                .await
                .context("sending create-user request")?
                .error_for_status()?;
            println!("{}", user.id.0);
        }
    }

    Ok(())
}
