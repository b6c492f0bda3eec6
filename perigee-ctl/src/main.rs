use anyhow::Context;
use perigee_api::{AuthToken, Comment, NewUser, UserId, Uuid};

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
    },

    /// List comments waiting for moderation
    PendingComments,

    /// Publish a comment held for moderation
    ApproveComment {
        /// Comment id, as shown by pending-comments
        id: Uuid,
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
        } => {
            // the server only ever sees the hash
            let hash = bcrypt::hash(&initial_password, bcrypt::DEFAULT_COST)
                .context("hashing initial password")?;
            client
                .post(format!("{}/api/admin/create-user", opt.host))
                .json(&NewUser {
                    id: UserId(Uuid::new_v4()),
                    name,
                    initial_password_hash: hash,
                })
                .bearer_auth(admin_token()?.0)
                .send()
                .await?
                .error_for_status()?;
        }
        Command::PendingComments => {
            let pending: Vec<Comment> = client
                .get(format!("{}/api/admin/pending-comments", opt.host))
                .bearer_auth(admin_token()?.0)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            for c in pending {
                println!("{}  {}  {:?}", c.id.0, c.author.name, c.content);
            }
        }
        Command::ApproveComment { id } => {
            client
                .post(format!("{}/api/admin/approve-comment/{}", opt.host, id))
                .bearer_auth(admin_token()?.0)
                .send()
                .await?
                .error_for_status()?;
        }
    }

    Ok(())
}
