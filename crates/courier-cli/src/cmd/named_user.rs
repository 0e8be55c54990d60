use crate::cmd::{block_on, Session};
use crate::output::print_json;
use clap::Subcommand;
use courier_core::named_user::SetIdOutcome;
use std::path::Path;

#[derive(Subcommand)]
pub enum NamedUserSubcommand {
    /// Show the named user id and change token
    Show,
    /// Associate the device with a named user
    Set {
        /// Named user id (1-128 characters, surrounding whitespace ignored)
        id: String,
    },
    /// Disassociate the device from its named user
    Clear,
    /// Re-send the current identity to the remote service
    ForceUpdate,
    /// Queue tag-group edits for the named user
    Tag {
        /// Tag group to edit
        #[arg(long)]
        group: String,
        /// Tags to add (repeatable)
        #[arg(long)]
        add: Vec<String>,
        /// Tags to remove (repeatable)
        #[arg(long)]
        remove: Vec<String>,
    },
}

pub fn run(root: &Path, subcmd: NamedUserSubcommand, json: bool) -> anyhow::Result<()> {
    let session = Session::open(root)?;
    let named_user = session.courier.named_user().clone();

    match subcmd {
        NamedUserSubcommand::Show => {
            let record = named_user.record()?;
            if json {
                print_json(&record)?;
            } else {
                println!("named user:   {}", record.id.as_deref().unwrap_or("(none)"));
                println!(
                    "change token: {}",
                    record
                        .change_token
                        .as_ref()
                        .map(|t| t.as_str())
                        .unwrap_or("(none)")
                );
            }
        }
        NamedUserSubcommand::Set { id } => {
            report(named_user.set_id(Some(&id))?, json)?;
        }
        NamedUserSubcommand::Clear => {
            report(named_user.set_id(None)?, json)?;
        }
        NamedUserSubcommand::ForceUpdate => {
            named_user.force_update()?;
            println!("Named user update scheduled.");
        }
        NamedUserSubcommand::Tag { group, add, remove } => {
            if add.is_empty() && remove.is_empty() {
                anyhow::bail!("nothing to do: pass --add and/or --remove");
            }
            named_user
                .edit_tag_groups()
                .add_tags(&group, add.iter().map(String::as_str))
                .remove_tags(&group, remove.iter().map(String::as_str))
                .apply()?;
            println!("Tag edits queued for group '{}'.", group.trim());
        }
    }

    let jobs = block_on(session.drain())?;
    tracing::info!(jobs, "named user jobs run");
    Ok(())
}

fn report(outcome: SetIdOutcome, json: bool) -> anyhow::Result<()> {
    if json {
        print_json(&serde_json::json!({ "outcome": outcome }))?;
    } else {
        match outcome {
            SetIdOutcome::Updated => println!("Named user updated."),
            SetIdOutcome::Unchanged => println!("Named user unchanged."),
            SetIdOutcome::Rejected => {}
        }
    }
    if outcome == SetIdOutcome::Rejected {
        anyhow::bail!("named user id rejected: must be 1-128 characters");
    }
    Ok(())
}
