use crate::cmd::{block_on, Session};
use crate::output::print_json;
use clap::Subcommand;
use std::path::Path;

#[derive(Subcommand)]
pub enum ChannelSubcommand {
    /// Show the channel id and device tags
    Show,
    /// Record the channel id assigned by the push provider
    Set {
        /// Channel id
        id: String,
    },
    /// Forget the channel id
    Clear,
}

pub fn run(root: &Path, subcmd: ChannelSubcommand, json: bool) -> anyhow::Result<()> {
    let session = Session::open(root)?;
    let channel = session.courier.channel().clone();

    match subcmd {
        ChannelSubcommand::Show => {
            let id = channel.id()?;
            let tags = channel.tags()?;
            if json {
                print_json(&serde_json::json!({ "id": id, "tags": tags }))?;
            } else {
                println!("channel id: {}", id.as_deref().unwrap_or("(none)"));
                let tags: Vec<String> = tags.into_iter().collect();
                println!("tags:       {}", tags.join(", "));
            }
        }
        ChannelSubcommand::Set { id } => {
            channel.set_id(Some(&id))?;
            // A new channel needs the current identity re-sent, or the
            // absence of one reported.
            let named_user = session.courier.named_user();
            if named_user.id()?.is_some() {
                named_user.force_update()?;
            } else {
                named_user.disassociate_if_null()?;
            }
            println!("Channel id set: {}", id.trim());
        }
        ChannelSubcommand::Clear => {
            channel.set_id(None)?;
            println!("Channel id cleared.");
        }
    }

    block_on(session.drain())?;
    Ok(())
}
