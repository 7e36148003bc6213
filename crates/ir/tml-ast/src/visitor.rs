//! Visitor infrastructure for traversing function bodies in evaluation order

use crate::{Body, Expr, ExprId, PatternId, Stmt, StmtId};

/// Visitor over a [`Body`].
///
/// Every method has a default that recurses through [`walk_expr`] /
/// [`walk_stmt`], so implementors override only the nodes they care about.
/// Children are visited in the order they are evaluated at run time, and
/// [`ExprVisitor::leave_expr`] fires after all children of a node.
pub trait ExprVisitor {
    /// Visit an expression by ID
    fn visit_expr(&mut self, body: &Body, expr: ExprId) {
        walk_expr(self, body, expr);
    }

    /// Visit a statement by ID
    fn visit_stmt(&mut self, body: &Body, stmt: StmtId) {
        walk_stmt(self, body, stmt);
    }

    /// Visit a pattern that introduces bindings
    fn visit_pattern(&mut self, _body: &Body, _pattern: PatternId) {}

    /// Called once an expression and all of its children have been visited
    fn leave_expr(&mut self, _body: &Body, _expr: ExprId) {}
}

/// Visits the children of `expr` in evaluation order, then calls `leave_expr`.
pub fn walk_expr<V: ExprVisitor + ?Sized>(visitor: &mut V, body: &Body, expr: ExprId) {
    match &body.exprs[expr] {
        Expr::Literal { .. } | Expr::Ident { .. } | Expr::Break { .. } | Expr::Continue { .. } => {}
        Expr::Field { base, .. } => visitor.visit_expr(body, *base),
        Expr::Index { base, index, .. } => {
            visitor.visit_expr(body, *base);
            visitor.visit_expr(body, *index);
        }
        Expr::Deref { operand, .. } | Expr::Ref { operand, .. } | Expr::Unary { operand, .. } => {
            visitor.visit_expr(body, *operand);
        }
        Expr::Call { args, .. } | Expr::Tuple { elements: args, .. } | Expr::Array { elements: args, .. } => {
            for arg in args {
                visitor.visit_expr(body, *arg);
            }
        }
        Expr::MethodCall { receiver, args, .. } => {
            visitor.visit_expr(body, *receiver);
            for arg in args {
                visitor.visit_expr(body, *arg);
            }
        }
        Expr::Binary { lhs, rhs, .. } => {
            visitor.visit_expr(body, *lhs);
            visitor.visit_expr(body, *rhs);
        }
        Expr::Assign { target, value, .. } => {
            visitor.visit_expr(body, *value);
            visitor.visit_expr(body, *target);
        }
        Expr::Block { stmts, tail, .. } => {
            for stmt in stmts {
                visitor.visit_stmt(body, *stmt);
            }
            if let Some(tail) = tail {
                visitor.visit_expr(body, *tail);
            }
        }
        Expr::If {
            condition,
            then_branch,
            else_branch,
            ..
        } => {
            visitor.visit_expr(body, *condition);
            visitor.visit_expr(body, *then_branch);
            if let Some(else_branch) = else_branch {
                visitor.visit_expr(body, *else_branch);
            }
        }
        Expr::When { scrutinee, arms, .. } => {
            visitor.visit_expr(body, *scrutinee);
            for arm in arms {
                visitor.visit_pattern(body, arm.pattern);
                if let Some(guard) = arm.guard {
                    visitor.visit_expr(body, guard);
                }
                visitor.visit_expr(body, arm.body);
            }
        }
        Expr::Loop { body: loop_body, .. } => visitor.visit_expr(body, *loop_body),
        Expr::While {
            condition,
            body: loop_body,
            ..
        } => {
            visitor.visit_expr(body, *condition);
            visitor.visit_expr(body, *loop_body);
        }
        Expr::For {
            pattern,
            iterable,
            body: loop_body,
            ..
        } => {
            visitor.visit_expr(body, *iterable);
            visitor.visit_pattern(body, *pattern);
            visitor.visit_expr(body, *loop_body);
        }
        Expr::Return { value, .. } => {
            if let Some(value) = value {
                visitor.visit_expr(body, *value);
            }
        }
        Expr::StructLit { fields, .. } => {
            for (_, value) in fields {
                visitor.visit_expr(body, *value);
            }
        }
        Expr::Closure {
            params,
            body: closure_body,
            ..
        } => {
            for param in params {
                visitor.visit_pattern(body, param.pattern);
            }
            visitor.visit_expr(body, *closure_body);
        }
    }
    visitor.leave_expr(body, expr);
}

/// Visits the children of `stmt`: the initializer first, then the pattern.
pub fn walk_stmt<V: ExprVisitor + ?Sized>(visitor: &mut V, body: &Body, stmt: StmtId) {
    match &body.stmts[stmt] {
        Stmt::Let {
            pattern,
            initializer,
            ..
        } => {
            if let Some(init) = initializer {
                visitor.visit_expr(body, *init);
            }
            visitor.visit_pattern(body, *pattern);
        }
        Stmt::Expr { expr, .. } => visitor.visit_expr(body, *expr),
    }
}
