//! Blog service: CRUD plus listing against a [`Collection`].
//!
//! Handlers translate store outcomes into call statuses: an unparsable
//! identifier is `InvalidArgument`, a lookup miss or undecodable stored
//! record is `NotFound`, and backend or encoding failures are `Internal`.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::channel::StreamSender;
use crate::codec::MsgPackCodec;
use crate::server::ServerBuilder;
use crate::status::Status;
use crate::store::{Collection, DocumentId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blog {
    pub id: String,
    pub author_id: String,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateBlogRequest {
    pub blog: Blog,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateBlogResponse {
    pub blog: Blog,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadBlogRequest {
    pub blog_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadBlogResponse {
    pub blog: Blog,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateBlogRequest {
    pub blog: Blog,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateBlogResponse {
    pub blog: Blog,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteBlogRequest {
    pub blog_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteBlogResponse {
    pub blog_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListBlogRequest {}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListBlogResponse {
    pub blog: Blog,
}

/// Stored shape of one blog; the identifier is the document key, not part of
/// the body.
#[derive(Debug, Serialize, Deserialize)]
struct BlogRecord {
    author_id: String,
    title: String,
    content: String,
}

impl BlogRecord {
    fn into_blog(self, id: DocumentId) -> Blog {
        Blog {
            id: id.to_string(),
            author_id: self.author_id,
            title: self.title,
            content: self.content,
        }
    }
}

fn parse_blog_id(raw: &str) -> Result<DocumentId, Status> {
    raw.parse()
        .map_err(|_| Status::invalid_argument(format!("cannot parse blog ID {raw:?}")))
}

fn encode_record(blog: &Blog) -> Result<Bytes, Status> {
    let record = BlogRecord {
        author_id: blog.author_id.clone(),
        title: blog.title.clone(),
        content: blog.content.clone(),
    };
    MsgPackCodec::encode(&record)
        .map(Bytes::from)
        .map_err(|e| Status::internal(format!("cannot encode blog record: {e}")))
}

/// Blog handlers over an injected collection.
pub struct BlogService {
    collection: Arc<dyn Collection>,
}

impl BlogService {
    pub fn new(collection: Arc<dyn Collection>) -> Self {
        Self { collection }
    }

    /// Register every blog method.
    pub fn register(self, builder: ServerBuilder) -> ServerBuilder {
        let coll = self.collection;

        let create_coll = coll.clone();
        let read_coll = coll.clone();
        let update_coll = coll.clone();
        let delete_coll = coll.clone();
        let list_coll = coll;

        builder
            .unary("blog.CreateBlog", move |req: CreateBlogRequest, _token| {
                let coll = create_coll.clone();
                async move {
                    tracing::info!(title = %req.blog.title, "CreateBlog invoked");
                    let body = encode_record(&req.blog)?;
                    let id = coll
                        .insert_one(body)
                        .await
                        .map_err(|e| Status::internal(format!("cannot insert blog: {e}")))?;
                    Ok(CreateBlogResponse {
                        blog: Blog {
                            id: id.to_string(),
                            ..req.blog
                        },
                    })
                }
            })
            .unary("blog.ReadBlog", move |req: ReadBlogRequest, _token| {
                let coll = read_coll.clone();
                async move {
                    tracing::info!(id = %req.blog_id, "ReadBlog invoked");
                    let id = parse_blog_id(&req.blog_id)?;
                    let doc = coll
                        .find_one(id)
                        .await
                        .map_err(|e| Status::internal(format!("cannot read blog: {e}")))?
                        .ok_or_else(|| {
                            Status::not_found(format!("no blog with ID {}", req.blog_id))
                        })?;
                    let record: BlogRecord = MsgPackCodec::decode(&doc.body).map_err(|_| {
                        Status::not_found(format!("no blog with ID {}", req.blog_id))
                    })?;
                    Ok(ReadBlogResponse {
                        blog: record.into_blog(id),
                    })
                }
            })
            .unary("blog.UpdateBlog", move |req: UpdateBlogRequest, _token| {
                let coll = update_coll.clone();
                async move {
                    tracing::info!(id = %req.blog.id, "UpdateBlog invoked");
                    let id = parse_blog_id(&req.blog.id)?;
                    // the document must already exist; update never upserts
                    let existing = coll
                        .find_one(id)
                        .await
                        .map_err(|e| Status::internal(format!("cannot read blog: {e}")))?
                        .ok_or_else(|| {
                            Status::not_found(format!("no blog with ID {}", req.blog.id))
                        })?;
                    let _: BlogRecord = MsgPackCodec::decode(&existing.body).map_err(|_| {
                        Status::not_found(format!("no blog with ID {}", req.blog.id))
                    })?;

                    let body = encode_record(&req.blog)?;
                    coll.replace_one(id, body)
                        .await
                        .map_err(|e| Status::internal(format!("cannot update blog: {e}")))?;
                    Ok(UpdateBlogResponse { blog: req.blog })
                }
            })
            .unary("blog.DeleteBlog", move |req: DeleteBlogRequest, _token| {
                let coll = delete_coll.clone();
                async move {
                    tracing::info!(id = %req.blog_id, "DeleteBlog invoked");
                    let id = parse_blog_id(&req.blog_id)?;
                    let deleted = coll
                        .delete_one(id)
                        .await
                        .map_err(|e| Status::internal(format!("cannot delete blog: {e}")))?;
                    if deleted == 0 {
                        return Err(Status::not_found(format!(
                            "no blog with ID {}",
                            req.blog_id
                        )));
                    }
                    Ok(DeleteBlogResponse {
                        blog_id: req.blog_id,
                    })
                }
            })
            .server_streaming(
                "blog.ListBlog",
                move |_req: ListBlogRequest, mut tx: StreamSender<ListBlogResponse>| {
                    let coll = list_coll.clone();
                    async move {
                        tracing::info!("ListBlog invoked");
                        // cursor is released on drop at every exit path
                        let mut cursor = coll.find_cursor().await.map_err(|e| {
                            Status::internal(format!("cannot list blogs: {e}"))
                        })?;
                        loop {
                            let doc = cursor.next().await.map_err(|e| {
                                Status::internal(format!("cursor failure: {e}"))
                            })?;
                            let Some(doc) = doc else { break };
                            let record: BlogRecord =
                                MsgPackCodec::decode(&doc.body).map_err(|e| {
                                    Status::internal(format!("cannot decode blog record: {e}"))
                                })?;
                            tx.send(&ListBlogResponse {
                                blog: record.into_blog(doc.id),
                            })?;
                        }
                        Ok(())
                    }
                },
            )
    }
}
