//! `rep` — command-line front-end for the document repository.
//!
//! Thin argument-parsing layer over [`rep_sdk::client::RepClient`]; every
//! subcommand maps onto one client call.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use rep_sdk::client::RepClient;
use rep_sdk::state::{ClientState, state_dir};
use rep_sdk::types::Permission;

#[derive(Parser)]
#[command(name = "rep", about = "Document repository client")]
struct Cli {
    /// Path to the repository public key file (overrides stored state)
    #[arg(short = 'k', long)]
    key: Option<PathBuf>,

    /// Repository address, e.g. http://127.0.0.1:5000 (overrides stored state)
    #[arg(short = 'r', long)]
    repo: Option<String>,

    /// Increase verbosity
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Derive a key pair from a password and store the public key
    SubjectCredentials { password: String, credentials_file: PathBuf },
    /// Decrypt a downloaded file given its encryption metadata
    DecryptFile { encrypted_file: PathBuf, encryption_metadata: PathBuf },
    /// Create an organization with its first subject
    CreateOrg {
        organization: String,
        username: String,
        name: String,
        email: String,
        public_key_file: PathBuf,
    },
    /// List all organizations
    ListOrgs,
    /// Establish an authenticated session
    CreateSession {
        organization: String,
        username: String,
        password: String,
        session_file: PathBuf,
    },
    /// Download a file by handle
    GetFile {
        file_handle: String,
        file: Option<PathBuf>,
    },
    /// Assume a role in the session
    AssumeRole { session_file: PathBuf, role: String },
    /// Release a role from the session
    DropRole { session_file: PathBuf, role: String },
    /// List the session's assumed roles
    ListRoles { session_file: PathBuf },
    /// List subjects and their states
    ListSubjects {
        session_file: PathBuf,
        username: Option<String>,
    },
    /// List the subjects of a role
    ListRoleSubjects { session_file: PathBuf, role: String },
    /// List the roles of a subject
    ListSubjectRoles { session_file: PathBuf, username: String },
    /// List the permissions of a role
    ListRolePermissions { session_file: PathBuf, role: String },
    /// List the roles holding a permission
    ListPermissionRoles {
        session_file: PathBuf,
        permission: Permission,
    },
    /// Add a subject to the organization
    AddSubject {
        session_file: PathBuf,
        username: String,
        name: String,
        email: String,
        credentials_file: PathBuf,
    },
    /// Suspend a subject
    SuspendSubject { session_file: PathBuf, username: String },
    /// Reactivate a subject
    ActivateSubject { session_file: PathBuf, username: String },
    /// Add a role to the organization
    AddRole { session_file: PathBuf, role: String },
    /// Suspend a role
    SuspendRole { session_file: PathBuf, role: String },
    /// Reactivate a role
    ReactivateRole { session_file: PathBuf, role: String },
    /// Grant a permission to a role, or add a subject to it
    AddPermission {
        session_file: PathBuf,
        role: String,
        permission_or_username: String,
    },
    /// Revoke a permission from a role, or remove a subject from it
    RemovePermission {
        session_file: PathBuf,
        role: String,
        permission_or_username: String,
    },
    /// List documents, optionally filtered by creator and date
    ListDocs {
        session_file: PathBuf,
        /// Only documents created by this subject
        #[arg(short = 's', long)]
        creator: Option<String>,
        /// Date comparison: nt|ot|eq DD-MM-YYYY
        #[arg(short = 'd', long, num_args = 2, value_names = ["FILTER", "DATE"])]
        date: Option<Vec<String>>,
    },
    /// Deposit a document
    AddDoc {
        session_file: PathBuf,
        document_name: String,
        file: PathBuf,
    },
    /// Fetch a document's metadata
    GetDocMetadata {
        session_file: PathBuf,
        document_name: String,
    },
    /// Fetch and decrypt a document's file
    GetDocFile {
        session_file: PathBuf,
        document_name: String,
        file: Option<PathBuf>,
    },
    /// Clear a document's file handle
    DeleteDoc {
        session_file: PathBuf,
        document_name: String,
    },
    /// Change a document's ACL: + or - a permission for a role
    AclDoc {
        session_file: PathBuf,
        document_name: String,
        operation: String,
        role: String,
        permission: Permission,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    let dir = state_dir()?;
    let mut state = ClientState::load(&dir)?;
    state.apply_env()?;
    if let Some(repo) = &cli.repo {
        state.rep_address = Some(repo.clone());
    }
    if let Some(key) = &cli.key {
        state.set_pub_key_from_file(key)?;
    }
    state.save(&dir)?;

    run(cli.command, &state).await
}

async fn run(command: Command, state: &ClientState) -> Result<()> {
    match command {
        // Local commands first: no client, no network.
        Command::SubjectCredentials { password, credentials_file } => {
            RepClient::subject_credentials(&password, &credentials_file)?;
            println!("public key stored in {}", credentials_file.display());
            return Ok(());
        }
        Command::DecryptFile { encrypted_file, encryption_metadata } => {
            let plaintext = RepClient::decrypt_file(&encrypted_file, &encryption_metadata)?;
            std::io::stdout().write_all(&plaintext)?;
            return Ok(());
        }
        command => {
            let client = RepClient::new(state)?;
            dispatch(command, &client).await
        }
    }
}

async fn dispatch(command: Command, client: &RepClient) -> Result<()> {
    match command {
        Command::SubjectCredentials { .. } | Command::DecryptFile { .. } => unreachable!(),

        Command::CreateOrg { organization, username, name, email, public_key_file } => {
            let pem = std::fs::read_to_string(&public_key_file)
                .with_context(|| format!("reading {}", public_key_file.display()))?;
            let echoed = client.create_org(&organization, &username, &name, &email, &pem).await?;
            println!("{echoed}");
        }
        Command::ListOrgs => {
            for org in client.list_orgs().await? {
                println!("{org}");
            }
        }
        Command::CreateSession { organization, username, password, session_file } => {
            let id = client
                .create_session(&organization, &username, &password, &session_file)
                .await?;
            println!("session {id} stored in {}", session_file.display());
        }
        Command::GetFile { file_handle, file } => {
            let content = client.get_file(&file_handle).await?;
            write_output(&content, file.as_deref())?;
        }
        Command::AssumeRole { session_file, role } => {
            println!("{}", client.assume_role(&session_file, &role).await?);
        }
        Command::DropRole { session_file, role } => {
            println!("{}", client.drop_role(&session_file, &role).await?);
        }
        Command::ListRoles { session_file } => {
            for role in client.list_roles(&session_file).await? {
                println!("{role}");
            }
        }
        Command::ListSubjects { session_file, username } => {
            let subjects = client.list_subjects(&session_file, username.as_deref()).await?;
            for (name, state) in subjects {
                println!("{name}: {state}");
            }
        }
        Command::ListRoleSubjects { session_file, role } => {
            for (name, state) in client.list_role_subjects(&session_file, &role).await? {
                println!("{name}: {state}");
            }
        }
        Command::ListSubjectRoles { session_file, username } => {
            for (role, state) in client.list_subject_roles(&session_file, &username).await? {
                println!("{role}: {state}");
            }
        }
        Command::ListRolePermissions { session_file, role } => {
            for permission in client.list_role_permissions(&session_file, &role).await? {
                println!("{permission}");
            }
        }
        Command::ListPermissionRoles { session_file, permission } => {
            for role in client.list_permission_roles(&session_file, permission).await? {
                println!("{role}");
            }
        }
        Command::AddSubject { session_file, username, name, email, credentials_file } => {
            let result = client
                .add_subject(&session_file, &username, &name, &email, &credentials_file)
                .await?;
            println!("{result}");
        }
        Command::SuspendSubject { session_file, username } => {
            println!("{}", client.suspend_subject(&session_file, &username).await?);
        }
        Command::ActivateSubject { session_file, username } => {
            println!("{}", client.activate_subject(&session_file, &username).await?);
        }
        Command::AddRole { session_file, role } => {
            println!("{}", client.add_role(&session_file, &role).await?);
        }
        Command::SuspendRole { session_file, role } => {
            println!("{}", client.suspend_role(&session_file, &role).await?);
        }
        Command::ReactivateRole { session_file, role } => {
            println!("{}", client.reactivate_role(&session_file, &role).await?);
        }
        Command::AddPermission { session_file, role, permission_or_username } => {
            let result = client
                .add_permission(&session_file, &role, &permission_or_username)
                .await?;
            println!("{result}");
        }
        Command::RemovePermission { session_file, role, permission_or_username } => {
            let result = client
                .remove_permission(&session_file, &role, &permission_or_username)
                .await?;
            println!("{result}");
        }
        Command::ListDocs { session_file, creator, date } => {
            let date = match &date {
                Some(pair) if pair.len() == 2 => Some((pair[0].as_str(), pair[1].as_str())),
                Some(_) => anyhow::bail!("-d takes a filter (nt|ot|eq) and a DD-MM-YYYY date"),
                None => None,
            };
            let docs = client.list_docs(&session_file, creator.as_deref(), date).await?;
            println!("{}", serde_json::to_string_pretty(&docs)?);
        }
        Command::AddDoc { session_file, document_name, file } => {
            let content =
                std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            let result = client.add_doc(&session_file, &document_name, &content).await?;
            println!("{result}");
        }
        Command::GetDocMetadata { session_file, document_name } => {
            let metadata = client.get_doc_metadata(&session_file, &document_name).await?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
        }
        Command::GetDocFile { session_file, document_name, file } => {
            let content = client.get_doc_file(&session_file, &document_name).await?;
            write_output(&content, file.as_deref())?;
        }
        Command::DeleteDoc { session_file, document_name } => {
            println!("{}", client.delete_doc(&session_file, &document_name).await?);
        }
        Command::AclDoc { session_file, document_name, operation, role, permission } => {
            let result = client
                .acl_doc(&session_file, &document_name, &operation, &role, permission)
                .await?;
            println!("{result}");
        }
    }
    Ok(())
}

fn write_output(content: &[u8], file: Option<&std::path::Path>) -> Result<()> {
    match file {
        Some(path) => {
            std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))
        }
        None => {
            std::io::stdout().write_all(content)?;
            Ok(())
        }
    }
}
