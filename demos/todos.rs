//! A small end-to-end tour: query, optimistic mutation, invalidation.
//!
//! Run with: `cargo run --example todos`

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use refetch::prelude::*;
use tokio::time::sleep;

type Todos = Vec<String>;

/// Stand-in for a remote API.
#[derive(Clone)]
struct Server {
    todos: Arc<Mutex<Todos>>,
}

impl Server {
    fn new() -> Self {
        Self {
            todos: Arc::new(Mutex::new(vec!["water the plants".to_string()])),
        }
    }

    fn fetch(&self) -> BoxFuture<'static, Result<Todos, FetchError>> {
        let todos = self.todos.clone();
        Box::pin(async move {
            sleep(Duration::from_millis(150)).await; // pretend latency
            Ok(todos.lock().expect("server lock").clone())
        })
    }

    fn add(&self, title: String) -> BoxFuture<'static, Result<Todos, FetchError>> {
        let todos = self.todos.clone();
        Box::pin(async move {
            sleep(Duration::from_millis(150)).await;
            let mut todos = todos.lock().expect("server lock");
            todos.push(title);
            Ok(todos.clone())
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "refetch=debug".into()),
        )
        .init();

    let server = Server::new();
    let registry = QueryRegistry::new();

    let todos = registry.get_or_create_query(
        "todos",
        {
            let server = server.clone();
            move || server.fetch()
        },
        QueryConfig::new(Duration::from_secs(30), Duration::from_secs(300)),
    )?;

    let add_todo = registry.get_or_create_mutation(
        "add-todo",
        {
            let server = server.clone();
            move |title: String| server.add(title)
        },
        MutationConfig::default()
            .optimistic_update(|title: &String, previous: Option<&Todos>| {
                let mut next = previous.cloned().unwrap_or_default();
                next.push(title.clone());
                next
            })
            .invalidate_keys([QueryKey::from("todos")]),
    )?;

    // print every state the query goes through in the background
    {
        let mut states = todos.watch();
        tokio::spawn(async move {
            while let Some(state) = futures::StreamExt::next(&mut states).await {
                println!(
                    "  [{:?}{}] {:?}",
                    state.status,
                    if state.is_stale { ", stale" } else { "" },
                    state.data.as_deref().unwrap_or(&[]),
                );
            }
        });
    }

    println!("initial fetch:");
    sleep(Duration::from_millis(300)).await;

    println!("optimistic add (visible before the server confirms):");
    add_todo.mutate("buy milk".to_string()).await?;
    sleep(Duration::from_millis(400)).await;

    println!("explicit invalidation refetches:");
    registry.invalidate_queries("todos").await;
    sleep(Duration::from_millis(300)).await;

    registry.dispose();
    Ok(())
}
