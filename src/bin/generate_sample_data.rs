use rand::Rng;
use serde_json::json;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use community_feed::{
    config::Config,
    entities::{payload, MemberRole},
    infrastructure::gateway::{Gateway, MutationOp, SqliteGateway, Table},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    println!("🚀 Generating sample data for the community feed");

    let config = Config::from_env()?;
    let database_url = config.gateway.database_url.clone();
    println!("Initializing database at {}", database_url);
    let sqlite = SqliteGateway::connect(&database_url, config.gateway.public_base_url.clone()).await?;
    sqlite.initialize().await?;
    let gateway: Arc<dyn Gateway> = Arc::new(sqlite);

    let mut rng = rand::rng();

    // Users
    let sample_users = vec![
        ("u-alice", "Alice Johnson"),
        ("u-bob", "Bob Smith"),
        ("u-carol", "Carol Wilson"),
        ("u-david", "David Brown"),
        ("u-eve", "Eve Davis"),
        ("u-frank", "Frank Miller"),
    ];

    println!("\n👥 Creating {} users...", sample_users.len());
    for (id, name) in &sample_users {
        gateway
            .mutate(
                Table::Users,
                MutationOp::Insert,
                payload(json!({
                    "id": id,
                    "full_name": name,
                    "avatar_url": format!("https://api.dicebear.com/7.x/avataaars/svg?seed={}", name.replace(' ', "")),
                })),
            )
            .await?;
        println!("  ✓ Created user '{}' ({})", name, id);
    }

    // Groups, each led by one user, with a random set of approved members
    println!("\n🏘  Creating groups...");
    let sample_groups = vec![
        ("Morning Prayer", "Daily prayer before work", false),
        ("Youth Ministry", "Events and discussion for young adults", false),
        ("Choir", "Rehearsal schedules and sheet music", true),
    ];

    let mut group_ids = Vec::new();
    for (index, (name, description, is_private)) in sample_groups.iter().enumerate() {
        let leader = sample_users[index].0;
        let members: Vec<&str> = sample_users
            .iter()
            .map(|(id, _)| *id)
            .filter(|id| *id == leader || rng.random_bool(0.5))
            .collect();

        let group = gateway
            .mutate(
                Table::Groups,
                MutationOp::Insert,
                payload(json!({
                    "name": name,
                    "description": description,
                    "is_private": is_private,
                    "leader_id": leader,
                    "member_count": members.len(),
                    "status": "approved",
                })),
            )
            .await?;
        let group_id = group.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();

        for member in &members {
            let role = if *member == leader { MemberRole::Admin } else { MemberRole::Member };
            gateway
                .mutate(
                    Table::GroupMembers,
                    MutationOp::Insert,
                    payload(json!({"group_id": group_id, "user_id": member, "role": role, "status": "approved"})),
                )
                .await?;
        }

        println!("  ✓ Created group '{}' with {} members", name, members.len());
        group_ids.push(group_id);
    }

    // Posts, split between the public feed and the groups
    println!("\n📝 Creating sample posts...");
    let sample_posts = vec![
        "Thank you all for the warm welcome on Sunday!",
        "Reminder: potluck after the evening service, bring a dish to share",
        "Does anyone have a spare hymnal I could borrow this week?",
        "Photos from the retreat are up, what a weekend",
        "Looking for volunteers to help set up chairs on Saturday",
        "Grateful for this community 🙏",
        "New study series starts next Tuesday, everyone is welcome",
        "Rehearsal moved to 7pm this Thursday",
    ];

    let mut post_ids = Vec::new();
    for (index, text) in sample_posts.iter().enumerate() {
        let (author, _) = sample_users[rng.random_range(0..sample_users.len())];
        let group_id = if index % 3 == 0 {
            None
        } else {
            Some(group_ids[rng.random_range(0..group_ids.len())].clone())
        };
        let created_at = chrono::Utc::now() - chrono::Duration::hours(index as i64 * 5);

        let post = gateway
            .mutate(
                Table::Posts,
                MutationOp::Insert,
                payload(json!({
                    "user_id": author,
                    "content": format!("<p>{}</p>", text),
                    "content_text": text,
                    "group_id": group_id,
                    "likes_count": 0,
                    "comments_count": 0,
                    "views_count": rng.random_range(0..200),
                    "is_pinned": index == 1,
                    "created_at": created_at.to_rfc3339(),
                })),
            )
            .await?;
        let post_id = post.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        println!("  ✓ Created post by {} ({})", author, post_id);
        post_ids.push(post_id);
    }

    // Likes and threaded comments
    println!("\n❤️  Creating likes and comments...");
    let mut like_total = 0;
    let mut comment_total = 0;
    for post_id in &post_ids {
        let mut likes = 0;
        for (user_id, _) in &sample_users {
            if rng.random_bool(0.4) {
                gateway
                    .mutate(
                        Table::PostLikes,
                        MutationOp::Insert,
                        payload(json!({"id": format!("{}:{}", post_id, user_id), "post_id": post_id, "user_id": user_id})),
                    )
                    .await?;
                likes += 1;
            }
        }

        let mut previous: Option<String> = None;
        let comment_count = rng.random_range(0..4);
        for n in 0..comment_count {
            let (user_id, _) = sample_users[rng.random_range(0..sample_users.len())];
            let parent_id = previous.clone().filter(|_| rng.random_bool(0.5));
            let comment = gateway
                .mutate(
                    Table::Comments,
                    MutationOp::Insert,
                    payload(json!({
                        "post_id": post_id,
                        "user_id": user_id,
                        "content": format!("Amen to that! ({})", n + 1),
                        "parent_id": parent_id,
                    })),
                )
                .await?;
            previous = comment.get("id").and_then(|v| v.as_str()).map(str::to_string);
        }

        gateway
            .mutate(
                Table::Posts,
                MutationOp::Update { id: post_id.clone() },
                payload(json!({"likes_count": likes, "comments_count": comment_count})),
            )
            .await?;
        like_total += likes;
        comment_total += comment_count;
    }

    println!("  ✓ Created {} likes and {} comments", like_total, comment_total);
    println!("\n✅ Sample data generation complete");
    Ok(())
}
