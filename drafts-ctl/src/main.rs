use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use drafts_client::{
    api::{ImageUpload, NodeId, UserId, Uuid, Vote},
    ContentStore, FileStorage, HttpGateway, Session, Snapshot, SortMode, ThreadView,
};

#[derive(structopt::StructOpt)]
struct Opt {
    #[structopt(short, long)]
    host: String,

    /// Directory holding persisted client state (the vote overlay)
    #[structopt(long, default_value = ".drafts-state")]
    state_dir: PathBuf,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(structopt::StructOpt)]
enum Command {
    /// List top-level articles, optionally filtered by a substring
    List { query: Option<String> },

    /// Show one article with its comment thread
    Show {
        id: Uuid,

        #[structopt(long, default_value = "5")]
        depth: u32,

        /// Sort replies by creation time instead of score
        #[structopt(long)]
        newest: bool,
    },

    /// Post a new article
    Post {
        title: String,
        content: String,

        /// Image files to attach
        #[structopt(short, long)]
        image: Vec<PathBuf>,
    },

    /// Reply to an article or comment
    Reply {
        parent: Uuid,
        content: String,

        #[structopt(short, long)]
        image: Vec<PathBuf>,
    },

    /// Toggle your vote; direction is "up" or "down"
    Vote { id: Uuid, direction: String },

    /// Edit one of your own nodes
    Edit {
        id: Uuid,

        #[structopt(long)]
        title: Option<String>,

        #[structopt(long)]
        content: Option<String>,
    },

    /// Delete one of your own nodes, replies included
    Delete { id: Uuid },
}

fn session() -> anyhow::Result<Session> {
    let user =
        std::env::var("DRAFTS_USER").context("retrieving DRAFTS_USER environment variable")?;
    let user = Uuid::try_parse(&user).context("parsing DRAFTS_USER as a user id")?;
    let username = std::env::var("DRAFTS_USERNAME")
        .context("retrieving DRAFTS_USERNAME environment variable")?;
    Ok(Session::new(UserId(user), &username))
}

fn load_images(paths: Vec<PathBuf>) -> anyhow::Result<Vec<ImageUpload>> {
    paths
        .into_iter()
        .map(|path| {
            let bytes =
                std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
            let filename = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("image")
                .to_string();
            let content_type = match path.extension().and_then(|e| e.to_str()) {
                Some("jpg") | Some("jpeg") => "image/jpeg",
                Some("gif") => "image/gif",
                Some("webp") => "image/webp",
                _ => "image/png",
            };
            Ok(ImageUpload {
                filename,
                content_type: content_type.to_string(),
                bytes,
            })
        })
        .collect()
}

fn first_line(content: &str) -> &str {
    content.lines().next().unwrap_or("")
}

fn print_thread(view: &mut ThreadView, snap: &Snapshot, parent: &NodeId, indent: usize) {
    let page = view.page(snap, parent);
    let pad = " ".repeat(indent);
    for node in &page.items {
        println!(
            "{pad}[{:>3}] {}: {}  ({})",
            node.score(),
            node.owner_username,
            first_line(&node.content),
            node.id.0,
        );
        print_thread(view, snap, &node.id, indent + 2);
    }
    if page.has_more() {
        println!("{pad}({} more replies)", page.remaining);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt::init();
    }
    let opt = <Opt as structopt::StructOpt>::from_args();

    let gateway = Arc::new(HttpGateway::new(
        &opt.host,
        std::env::var("DRAFTS_TOKEN").ok(),
    ));
    let storage = Arc::new(FileStorage::new(&opt.state_dir));
    let store = ContentStore::new(gateway, storage);

    match opt.cmd {
        Command::List { query } => {
            if let Ok(session) = session() {
                store.set_session(Some(session));
            }
            store.load().await.context("loading the article listing")?;
            let ids = store.snapshot().roots().map(|n| n.id).collect();
            store.refresh_vote_counts(ids).await;
            for node in store.roots_matching(query.as_deref().unwrap_or("")) {
                println!(
                    "{} [{:>4}] {} by {} ({} replies)",
                    node.id.0,
                    node.score(),
                    node.title,
                    node.owner_username,
                    node.child_count,
                );
            }
        }

        Command::Show { id, depth, newest } => {
            if let Ok(session) = session() {
                store.set_session(Some(session));
            }
            let id = NodeId(id);
            store
                .load_detail(id, depth)
                .await
                .context("loading the thread")?;
            store.refresh_vote_counts(vec![id]).await;
            let snap = store.snapshot();
            let node = snap.get(&id).context("node missing after fetch")?;
            println!("# {} by {} [{:>3}]", node.title, node.owner_username, node.score());
            println!("{}", node.content);
            for image in &node.images {
                println!("  image: {image}");
            }
            println!();
            let mut view = ThreadView::new(id);
            if newest {
                view.set_sort(SortMode::Newest, &snap);
            }
            let focus = view.focus();
            print_thread(&mut view, &snap, &focus, 0);
        }

        Command::Post {
            title,
            content,
            image,
        } => {
            store.set_session(Some(session()?));
            let images = load_images(image)?;
            match store
                .create(&title, &content, images)
                .await
                .context("creating the article")?
            {
                Some(id) => println!("created {}", id.0),
                None => anyhow::bail!("article was refused locally (empty content?)"),
            }
        }

        Command::Reply {
            parent,
            content,
            image,
        } => {
            store.set_session(Some(session()?));
            let parent = NodeId(parent);
            store
                .load_detail(parent, 0)
                .await
                .context("fetching the parent")?;
            let images = load_images(image)?;
            match store
                .reply(parent, &content, images)
                .await
                .context("posting the reply")?
            {
                Some(id) => println!("replied {}", id.0),
                None => anyhow::bail!("reply was refused locally (empty content?)"),
            }
        }

        Command::Vote { id, direction } => {
            store.set_session(Some(session()?));
            let direction = match &direction as &str {
                "up" => Vote::Upvote,
                "down" => Vote::Downvote,
                other => anyhow::bail!("unknown direction {other:?}, expected \"up\" or \"down\""),
            };
            let id = NodeId(id);
            store.load_detail(id, 0).await.context("fetching the node")?;
            if !store.vote(id, direction).await.context("sending the vote")? {
                anyhow::bail!("vote was refused locally");
            }
            let node = store.get(&id).context("node missing after vote")?;
            println!("{} now at +{} / -{}", id.0, node.upvotes, node.downvotes);
        }

        Command::Edit { id, title, content } => {
            store.set_session(Some(session()?));
            let id = NodeId(id);
            store.load_detail(id, 0).await.context("fetching the node")?;
            match store
                .update_node(id, title, content)
                .await
                .context("updating the node")?
            {
                true => println!("updated {}", id.0),
                false => anyhow::bail!("edit was refused locally (not yours, or empty content?)"),
            }
        }

        Command::Delete { id } => {
            store.set_session(Some(session()?));
            let id = NodeId(id);
            store.load_detail(id, 0).await.context("fetching the node")?;
            match store.delete(id).await.context("deleting the node")? {
                true => println!("deleted {}", id.0),
                false => anyhow::bail!("delete was refused locally (not yours?)"),
            }
        }
    }

    Ok(())
}
