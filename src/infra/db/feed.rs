use async_trait::async_trait;
use metrics::counter;
use sqlx::FromRow;
use time::OffsetDateTime;
use tracing::debug;

use crate::{
    application::store::{FeedStore, MergeOutcome, RepoError},
    domain::post::{Post, PostId, from_epoch_millis, to_epoch_millis},
};

use super::{SqliteRepositories, map_sqlx_error};

const METRIC_STORE_PRUNED: &str = "wittr_store_pruned_total";

#[derive(Debug, FromRow)]
struct PostRow {
    id: String,
    time: i64,
    body: String,
    name: String,
    avatar: String,
    photo: Option<String>,
}

impl TryFrom<PostRow> for Post {
    type Error = RepoError;

    fn try_from(row: PostRow) -> Result<Self, Self::Error> {
        let time = from_epoch_millis(row.time).map_err(|err| RepoError::InvalidInput {
            message: err.to_string(),
        })?;
        Ok(Post {
            id: PostId::from(row.id),
            body: row.body,
            name: row.name,
            avatar: row.avatar,
            photo: row.photo,
            time,
        })
    }
}

#[async_trait]
impl FeedStore for SqliteRepositories {
    async fn merge(&self, posts: &[Post]) -> Result<MergeOutcome, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        for post in posts {
            sqlx::query(
                r#"
                INSERT INTO posts (id, time, body, name, avatar, photo)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    time = excluded.time,
                    body = excluded.body,
                    name = excluded.name,
                    avatar = excluded.avatar,
                    photo = excluded.photo
                "#,
            )
            .bind(post.id.as_str())
            .bind(to_epoch_millis(post.time))
            .bind(&post.body)
            .bind(&post.name)
            .bind(&post.avatar)
            .bind(post.photo.as_deref())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }

        let pruned = sqlx::query(
            r#"
            DELETE FROM posts
            WHERE id NOT IN (
                SELECT id FROM posts ORDER BY time DESC, id DESC LIMIT ?
            )
            "#,
        )
        .bind(self.capacity.get() as i64)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();

        let retained: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM posts")
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;

        if pruned > 0 {
            counter!(METRIC_STORE_PRUNED).increment(pruned);
        }
        debug!(
            target = "wittr::store",
            upserted = posts.len(),
            pruned,
            retained,
            "local store merged"
        );

        Ok(MergeOutcome {
            upserted: posts.len(),
            pruned: pruned as usize,
            retained: retained.max(0) as usize,
        })
    }

    async fn load(&self) -> Result<Vec<Post>, RepoError> {
        let rows = sqlx::query_as::<_, PostRow>(
            r#"
            SELECT id, time, body, name, avatar, photo
            FROM posts
            ORDER BY time DESC, id DESC
            "#,
        )
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(Post::try_from).collect()
    }

    async fn latest_time(&self) -> Result<Option<OffsetDateTime>, RepoError> {
        let latest: Option<i64> = sqlx::query_scalar("SELECT MAX(time) FROM posts")
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        latest
            .map(|millis| {
                from_epoch_millis(millis).map_err(|err| RepoError::InvalidInput {
                    message: err.to_string(),
                })
            })
            .transpose()
    }

    async fn len(&self) -> Result<usize, RepoError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM posts")
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(count.max(0) as usize)
    }

    fn capacity(&self) -> usize {
        self.capacity.get()
    }
}
