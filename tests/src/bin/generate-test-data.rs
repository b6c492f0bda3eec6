use chrono::{DateTime, Duration, TimeZone, Utc};
use perigee_api::can_reply_at;
use rand::{seq::SliceRandom, Rng};
use uuid::Uuid;

const NUM_USERS: usize = 3;
const NUM_SUBJECTS: usize = 4;
const NUM_COMMENTS: usize = 150;
const NUM_LIKES: usize = 300;

const APPROVAL_RATE: f64 = 0.9;

fn gen_n_items(table: &str, n: usize, mut f: impl FnMut(usize) -> String) {
    println!("INSERT INTO {} VALUES", table);
    for i in 0..n {
        if i != 0 {
            println!(",");
        }
        print!("    {}", f(i));
    }
    println!();
    println!("ON CONFLICT DO NOTHING;");
}

#[derive(Clone, Copy)]
struct SeedComment {
    id: Uuid,
    subject: Uuid,
    depth: usize,
    created_at: DateTime<Utc>,
}

fn main() {
    let mut rng = rand::thread_rng();
    let epoch = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();

    // Generate users. The name gets an index suffix so the UNIQUE
    // constraint cannot silently drop a row other tables reference.
    let mut users = Vec::new();
    gen_n_items("users", NUM_USERS, |i| {
        let uuid = Uuid::new_v4();
        users.push(uuid);
        format!(
            "('{}', '{}-{}', '{}')",
            uuid,
            lipsum::lipsum_words(1),
            i,
            lipsum::lipsum_words(3).replace(' ', "-"),
        )
    });

    // Subjects live in another service, so there is no table to fill;
    // comments just need a few ids to cluster under.
    let subjects: Vec<Uuid> = (0..NUM_SUBJECTS).map(|_| Uuid::new_v4()).collect();

    // Generate comments, never deeper than a real reply could go
    let mut comments: Vec<SeedComment> = Vec::new();
    gen_n_items("comments", NUM_COMMENTS, |_| {
        let replyable: Vec<SeedComment> = comments
            .iter()
            .filter(|c| can_reply_at(c.depth))
            .copied()
            .collect();
        let parent = match replyable.is_empty() || rng.gen_bool(0.4) {
            true => None,
            false => replyable.choose(&mut rng).copied(),
        };
        let (subject, depth, created_at) = match parent {
            Some(p) => (
                p.subject,
                p.depth + 1,
                p.created_at + Duration::minutes(rng.gen_range(1..10_000)),
            ),
            None => (
                *subjects.choose(&mut rng).unwrap(),
                0,
                epoch + Duration::minutes(rng.gen_range(0..500_000)),
            ),
        };
        let id = Uuid::new_v4();
        comments.push(SeedComment {
            id,
            subject,
            depth,
            created_at,
        });
        format!(
            "('{}', '{}', {}, '{}', '{}', '{}', {})",
            id,
            subject,
            match parent {
                Some(p) => format!("'{}'", p.id),
                None => String::from("NULL"),
            },
            users.choose(&mut rng).unwrap(),
            lipsum::lipsum_words(rng.gen_range(5..40)),
            created_at.naive_utc(),
            rng.gen_bool(APPROVAL_RATE),
        )
    });

    // Generate likes; duplicate (comment, user) pairs fall into the
    // ON CONFLICT clause
    gen_n_items("comment_likes", NUM_LIKES, |_| {
        format!(
            "('{}', '{}')",
            comments.choose(&mut rng).unwrap().id,
            users.choose(&mut rng).unwrap(),
        )
    });
}
