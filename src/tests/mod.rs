mod app;
mod support;
mod web;
