//! Shared fixtures for tether integration tests
//!
//! A small object model with both flavours of "is-a":
//!
//! ```text
//! dyn Shape ◄── Circle      (trait object)
//!           ◄── Square
//!           ◄── Widget ◄── Button ◄── Toggle   (each embeds the previous)
//!
//! dyn Reading ◄── Gauge     (thread-safe anchor)
//! ```

#![allow(dead_code)]

use std::cell::Cell;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use tether::{anchored, sync, sync_anchored, upcast, Anchor};

pub trait Shape {
    fn area(&self) -> f64;
    fn label(&self) -> String;
}

pub struct Circle {
    pub anchor: Anchor<Circle>,
    pub radius: Cell<f64>,
}

impl Shape for Circle {
    fn area(&self) -> f64 {
        3.0 * self.radius.get() * self.radius.get()
    }

    fn label(&self) -> String {
        format!("circle r={}", self.radius.get())
    }
}

anchored!(Circle, anchor);
upcast!(Circle => dyn Shape);

pub struct Square {
    pub anchor: Anchor<Square>,
    pub side: f64,
}

impl Shape for Square {
    fn area(&self) -> f64 {
        self.side * self.side
    }

    fn label(&self) -> String {
        format!("square s={}", self.side)
    }
}

anchored!(Square, anchor);
upcast!(Square => dyn Shape);

/// Base type owning the anchor
pub struct Widget {
    pub anchor: Anchor<Widget>,
    pub name: String,
    pub clicks: Cell<u32>,
}

impl Widget {
    pub fn new(name: &str) -> Self {
        Widget {
            anchor: Anchor::new(),
            name: name.to_string(),
            clicks: Cell::new(0),
        }
    }
}

impl Shape for Widget {
    fn area(&self) -> f64 {
        0.0
    }

    fn label(&self) -> String {
        format!("widget {}", self.name)
    }
}

anchored!(Widget, anchor);
upcast!(Widget => dyn Shape);

/// Derived type deferring to its base's anchor
pub struct Button {
    pub widget: Widget,
    pub caption: String,
}

impl Button {
    pub fn new(name: &str, caption: &str) -> Self {
        Button {
            widget: Widget::new(name),
            caption: caption.to_string(),
        }
    }

    pub fn click(&self) {
        self.widget.clicks.set(self.widget.clicks.get() + 1);
    }
}

anchored!(Button => Widget, widget.anchor);
upcast!(Button => Widget, widget);
upcast!(Button => dyn Shape, widget);

/// Two levels down from the anchor's owner
pub struct Toggle {
    pub button: Button,
    pub on: Cell<bool>,
}

impl Toggle {
    pub fn new(name: &str) -> Self {
        Toggle {
            button: Button::new(name, "toggle"),
            on: Cell::new(false),
        }
    }
}

anchored!(Toggle => Widget, button.widget.anchor; Button);
upcast!(Toggle => Widget, button.widget);
upcast!(Toggle => Button, button);
upcast!(Toggle => dyn Shape, button.widget);

/// Thread-shareable view of a measurement
pub trait Reading: Sync {
    fn level(&self) -> u64;
}

pub struct Gauge {
    pub anchor: sync::Anchor<Gauge>,
    pub value: AtomicU64,
}

impl Reading for Gauge {
    fn level(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }
}

sync_anchored!(Gauge, anchor);
upcast!(Gauge => dyn Reading);

pub fn circle(radius: f64) -> Pin<Box<Circle>> {
    tether::pin_box(Circle {
        anchor: Anchor::new(),
        radius: Cell::new(radius),
    })
    .expect("fresh circle binds")
}

pub fn square(side: f64) -> Pin<Box<Square>> {
    tether::pin_box(Square {
        anchor: Anchor::new(),
        side,
    })
    .expect("fresh square binds")
}

pub fn widget(name: &str) -> Pin<Box<Widget>> {
    tether::pin_box(Widget::new(name)).expect("fresh widget binds")
}

pub fn button(name: &str, caption: &str) -> Pin<Box<Button>> {
    tether::pin_box(Button::new(name, caption)).expect("fresh button binds")
}

pub fn toggle(name: &str) -> Pin<Box<Toggle>> {
    tether::pin_box(Toggle::new(name)).expect("fresh toggle binds")
}

pub fn gauge(value: u64) -> Pin<Box<Gauge>> {
    sync::pin_box(Gauge {
        anchor: sync::Anchor::new(),
        value: AtomicU64::new(value),
    })
    .expect("fresh gauge binds")
}

/// Address of a value, for comparing against `Weak::addr`
pub fn addr_of<T: ?Sized>(value: &T) -> usize {
    value as *const T as *const () as usize
}
