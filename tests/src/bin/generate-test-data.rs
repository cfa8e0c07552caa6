use chrono::{Duration, Utc};
use rand::{seq::SliceRandom, Rng};
use uuid::Uuid;

use drafts_api::{ImageRef, Node, NodeId, Time, User, UserId};

const NUM_USERS: usize = 5;
const NUM_ARTICLES: usize = 12;

const MAX_REPLIES_PER_NODE: usize = 6;
const MAX_DEPTH: usize = 3;

const CONTENT_WORDS: usize = 40;
const REPLY_WORDS: usize = 18;
const REPLY_TITLE_CHARS: usize = 50;

const IMAGE_ODDS: f64 = 0.2;
const SPREAD_MINUTES: i64 = 60 * 24 * 30;

fn gen_users(rng: &mut impl Rng) -> Vec<User> {
    (0..NUM_USERS)
        .map(|i| {
            let word = lipsum::lipsum_words_from_seed(1, rng.gen());
            User::named(UserId(Uuid::new_v4()), &format!("{word}{i}"))
        })
        .collect()
}

fn gen_image(rng: &mut impl Rng, at: Time) -> ImageRef {
    let filename = format!("img-{:04}.png", rng.gen_range(0..10_000));
    // half the rows miss the dated path segments, as in the real database
    match rng.gen_bool(0.5) {
        true => ImageRef::Record {
            path: Some(format!("uploads/images/{}/{filename}", at.format("%Y/%m/%d"))),
            filename: Some(filename),
            created_at: Some(at),
        },
        false => ImageRef::Record {
            path: None,
            filename: Some(filename),
            created_at: Some(at),
        },
    }
}

fn gen_node(
    rng: &mut impl Rng,
    users: &[User],
    parent: Option<NodeId>,
    depth: usize,
    now: Time,
) -> Node {
    let id = NodeId(Uuid::new_v4());
    let author = users.choose(rng).expect("no users generated").clone();
    let created = now - Duration::minutes(rng.gen_range(0..SPREAD_MINUTES));

    let (title, content) = match parent {
        None => (
            lipsum::lipsum_title(),
            lipsum::lipsum_words_from_seed(CONTENT_WORDS, rng.gen()),
        ),
        Some(_) => {
            let content = lipsum::lipsum_words_from_seed(REPLY_WORDS, rng.gen());
            let title = content.chars().take(REPLY_TITLE_CHARS).collect();
            (title, content)
        }
    };

    let mut voters = users.to_vec();
    voters.shuffle(rng);
    let upvoters: Vec<User> = voters.drain(..rng.gen_range(0..=voters.len())).collect();
    let downvoters: Vec<User> = voters.drain(..rng.gen_range(0..=voters.len())).collect();

    let images = match rng.gen_bool(IMAGE_ODDS) {
        true => vec![gen_image(rng, created)],
        false => Vec::new(),
    };

    let max_replies = MAX_REPLIES_PER_NODE >> depth;
    let children: Vec<Node> = match depth < MAX_DEPTH {
        true => (0..rng.gen_range(0..=max_replies))
            .map(|_| gen_node(rng, users, Some(id), depth + 1, now))
            .collect(),
        false => Vec::new(),
    };

    Node {
        id,
        parent_id: parent,
        title,
        content,
        author_id: Some(author.id),
        author: Some(author),
        images,
        upvoters,
        downvoters,
        child_count: Some(children.len() as u32),
        children,
        created_at: Some(created),
        updated_at: Some(created),
    }
}

fn main() {
    let mut rng = rand::thread_rng();
    let now = Utc::now();

    let users = gen_users(&mut rng);
    let forest: Vec<Node> = (0..NUM_ARTICLES)
        .map(|_| gen_node(&mut rng, &users, None, 0, now))
        .collect();

    println!(
        "{}",
        serde_json::to_string_pretty(&forest).expect("serializing the generated forest")
    );
}
